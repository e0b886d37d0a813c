mod session_file;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use client_core::{ClientError, PortalStore, StoreConfig};
use shared::{
    domain::{CompanyId, JobId, Profile},
    protocol::{ProfileRequest, SignInRequest, SignUpRequest, UpdateSettingsRequest},
};
use tracing_subscriber::EnvFilter;

use crate::session_file::SessionFile;

#[derive(Parser, Debug)]
#[command(name = "portal", about = "Command-line client for the recruitment portal")]
struct Cli {
    #[arg(long, env = "PORTAL_SERVER_URL", default_value = "http://127.0.0.1:8080")]
    server_url: String,
    #[arg(long, env = "PORTAL_COMPANY_ID", default_value_t = 1)]
    company: i64,
    #[arg(long, env = "PORTAL_SESSION_FILE", default_value = ".portal/session.json")]
    session_file: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    SignUp {
        email: String,
        full_name: String,
        password: String,
    },
    SignIn {
        email: String,
        password: String,
    },
    /// Submits the one-time code sent after sign-up.
    Verify {
        otp: String,
    },
    Resend,
    SignOut,
    Whoami,
    #[command(subcommand)]
    Profile(ProfileCommand),
    /// Shows the branding of the selected company.
    Theme,
    UpdateSettings {
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        logo_url: Option<String>,
        #[arg(long)]
        company_name: Option<String>,
    },
    Jobs {
        #[arg(long)]
        force: bool,
    },
    Applications {
        #[arg(long)]
        force: bool,
    },
    Apply {
        job_id: i64,
        #[arg(long)]
        cover_letter: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    Show,
    Create(ProfileArgs),
    Update(ProfileArgs),
}

#[derive(Args, Debug, Default)]
struct ProfileArgs {
    #[arg(long)]
    first_name: Option<String>,
    #[arg(long)]
    middle_name: Option<String>,
    #[arg(long)]
    last_name: Option<String>,
    /// YYYY-MM-DD
    #[arg(long)]
    date_of_birth: Option<String>,
    #[arg(long)]
    gender: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    nationality: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    passport_number: Option<String>,
    #[arg(long)]
    relative_in_organisation: Option<bool>,
}

impl From<ProfileArgs> for ProfileRequest {
    fn from(args: ProfileArgs) -> Self {
        Self {
            first_name: args.first_name,
            middle_name: args.middle_name,
            last_name: args.last_name,
            date_of_birth: args.date_of_birth,
            gender: args.gender,
            phone: args.phone,
            nationality: args.nationality,
            address: args.address,
            passport_number: args.passport_number,
            relative_in_organisation: args.relative_in_organisation,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let session_file = SessionFile::new(cli.session_file);
    let store = PortalStore::open(StoreConfig::new(cli.server_url), CompanyId(cli.company)).await?;
    if let Some(saved) = session_file.load() {
        saved.restore(&store)?;
    }

    let outcome = run(&store, cli.command).await;
    session_file.store(&store.session())?;
    if let Err(ClientError::Remote(exception)) = &outcome {
        for field in &exception.fields {
            eprintln!("  {}: {}", field.field, field.message);
        }
    }
    outcome?;
    Ok(())
}

async fn run(store: &PortalStore, command: Command) -> Result<(), ClientError> {
    match command {
        Command::SignUp {
            email,
            full_name,
            password,
        } => {
            let pending = store
                .sign_up(&SignUpRequest {
                    email: Some(email),
                    full_name: Some(full_name),
                    password: Some(password),
                })
                .await?;
            println!(
                "verification code sent to {} (expires {})",
                pending.email, pending.code_expires_at
            );
        }
        Command::SignIn { email, password } => {
            let session = store
                .sign_in(&SignInRequest {
                    email: Some(email),
                    password: Some(password),
                })
                .await?;
            match (session.user(), session.pending_email()) {
                (Some(user), _) => println!("signed in as {} <{}>", user.full_name, user.email),
                (None, Some(email)) => {
                    println!("{email} is not verified yet; run `portal verify <code>`")
                }
                (None, None) => {}
            }
        }
        Command::Verify { otp } => {
            let auth = store.verify(&otp).await?;
            println!("verified; signed in as {}", auth.user.email);
        }
        Command::Resend => {
            let pending = store.resend_code().await?;
            println!(
                "new code sent to {} (expires {})",
                pending.email, pending.code_expires_at
            );
        }
        Command::SignOut => {
            store.sign_out()?;
            println!("signed out");
        }
        Command::Whoami => {
            let session = store.session();
            match (session.user(), session.pending_email()) {
                (Some(user), _) => println!("{} <{}>", user.full_name, user.email),
                (None, Some(email)) => println!("awaiting verification for {email}"),
                (None, None) => println!("signed out"),
            }
        }
        Command::Profile(ProfileCommand::Show) => print_profile(&store.profile().await?),
        Command::Profile(ProfileCommand::Create(args)) => {
            print_profile(&store.create_profile(&args.into()).await?)
        }
        Command::Profile(ProfileCommand::Update(args)) => {
            print_profile(&store.update_profile(&args.into()).await?)
        }
        Command::Theme => {
            let branding = store.branding();
            println!("company: {}", branding.company_name);
            println!("color:   {}", branding.color);
            println!("logo:    {}", branding.logo);
        }
        Command::UpdateSettings {
            color,
            logo_url,
            company_name,
        } => {
            store
                .update_settings(&UpdateSettingsRequest {
                    color,
                    logo_url,
                    company_name,
                })
                .await?;
            let branding = store.branding();
            println!(
                "saved: {} {} {}",
                branding.company_name, branding.color, branding.logo
            );
        }
        Command::Jobs { force } => {
            let jobs = store.refresh_jobs(force).await?;
            if jobs.is_empty() {
                println!("no open positions");
            }
            for job in jobs {
                println!("{}\t{}", job.job_id, job.title);
            }
        }
        Command::Applications { force } => {
            let applications = store.refresh_applications(force).await?;
            if applications.is_empty() {
                println!("no applications");
            }
            for application in applications {
                println!(
                    "{}\t{}\t{}\t{}",
                    application.application_id,
                    application.job_title,
                    application.status.as_str(),
                    application.created_at.format("%Y-%m-%d"),
                );
            }
        }
        Command::Apply {
            job_id,
            cover_letter,
        } => {
            let application = store.apply(JobId(job_id), cover_letter).await?;
            println!(
                "applied to {} (application {})",
                application.job_title, application.application_id
            );
        }
    }
    Ok(())
}

fn print_profile(profile: &Profile) {
    let middle = profile
        .middle_name
        .as_deref()
        .map(|name| format!(" {name}"))
        .unwrap_or_default();
    println!("{}{} {}", profile.first_name, middle, profile.last_name);
    println!("born:        {}", profile.date_of_birth);
    println!("gender:      {}", profile.gender.as_str());
    println!("phone:       {}", profile.phone);
    println!("nationality: {}", profile.nationality);
    println!("address:     {}", profile.address);
    if let Some(passport) = &profile.passport_number {
        println!("passport:    {passport}");
    }
    println!(
        "relative in organisation: {}",
        if profile.relative_in_organisation { "yes" } else { "no" }
    );
}
