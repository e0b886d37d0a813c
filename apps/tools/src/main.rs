use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use shared::{
    domain::{ApplicationId, ApplicationStatus, CompanyId, JobId},
    protocol::UpdateSettingsRequest,
    validation::Validate,
};
use storage::Storage;

/// Operator commands for seeding a portal database.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/portal.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateCompany {
        name: String,
    },
    ListCompanies,
    SetSettings {
        company_id: i64,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        logo_url: Option<String>,
        #[arg(long)]
        company_name: Option<String>,
    },
    CreateJob {
        company_id: i64,
        title: String,
        #[arg(default_value = "")]
        description: String,
    },
    CloseJob {
        job_id: i64,
    },
    SetApplicationStatus {
        application_id: i64,
        /// One of submitted, reviewing, interview, offered, rejected, withdrawn.
        status: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateCompany { name } => {
            let company_id = storage.create_company(name.trim()).await?;
            println!("created company_id={company_id}");
        }
        Command::ListCompanies => {
            for (company_id, name) in storage.list_companies().await? {
                println!("{company_id}\t{name}");
            }
        }
        Command::SetSettings {
            company_id,
            color,
            logo_url,
            company_name,
        } => {
            let company_id = CompanyId(company_id);
            if !storage.company_exists(company_id).await? {
                bail!("company {company_id} does not exist");
            }
            let patch = UpdateSettingsRequest {
                color,
                logo_url,
                company_name,
            }
            .validate()?;
            let saved = storage.upsert_settings(company_id, &patch).await?;
            println!(
                "settings for company_id={company_id}: color={} logo={} name={}",
                saved.color.as_deref().unwrap_or("-"),
                saved.logo_url.as_deref().unwrap_or("-"),
                saved.company_name.as_deref().unwrap_or("-"),
            );
        }
        Command::CreateJob {
            company_id,
            title,
            description,
        } => {
            let company_id = CompanyId(company_id);
            if !storage.company_exists(company_id).await? {
                bail!("company {company_id} does not exist");
            }
            if title.trim().is_empty() {
                bail!("job title must not be empty");
            }
            let job_id = storage
                .create_job(company_id, title.trim(), description.trim())
                .await?;
            println!("created job_id={job_id}");
        }
        Command::CloseJob { job_id } => {
            if !storage.set_job_open(JobId(job_id), false).await? {
                bail!("job {job_id} does not exist");
            }
            println!("closed job_id={job_id}");
        }
        Command::SetApplicationStatus {
            application_id,
            status,
        } => {
            let status: ApplicationStatus = status.parse()?;
            if !storage
                .set_application_status(ApplicationId(application_id), status)
                .await?
            {
                bail!("application {application_id} does not exist");
            }
            println!("application_id={application_id} is now {}", status.as_str());
        }
    }

    Ok(())
}
