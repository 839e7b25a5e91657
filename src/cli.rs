//! Command-line interface and settings for the daily panda job.
//!
//! Every setting can be given as a flag or an environment variable, and a
//! `.env` file in the working directory is loaded before parsing. The
//! scheduler normally invokes the binary with no arguments at all.

use chrono::NaiveDate;
use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};

/// Command-line arguments for the daily panda job.
///
/// # Examples
///
/// ```sh
/// # Daily run, configuration from the environment
/// daily_panda
///
/// # Show the panda stored for a given day
/// daily_panda show --date 2024-03-01
///
/// # Build the combined gif of every upload
/// daily_panda gif
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub settings: Settings,
}

impl Cli {
    /// The selected command, defaulting to the daily run.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Find, mail, publish and record today's panda
    Run,
    /// Print the panda recorded for a day
    Show {
        /// Day to look up (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Combine every uploaded panda into an animated gif
    Gif,
}

/// Process-wide settings, read once at startup.
#[derive(Args, Debug, Clone, Default)]
pub struct Settings {
    /// Mailgun sending domain
    #[arg(long, env = "MG_DOMAIN", default_value = "", global = true)]
    pub mg_domain: String,

    /// Mailgun private API key
    #[arg(long, env = "MG_API_KEY", default_value = "", hide_env_values = true, global = true)]
    pub mg_api_key: String,

    /// Mailgun API base URL
    #[arg(long, env = "MG_API_BASE", default_value = "https://api.eu.mailgun.net/v3", global = true)]
    pub mg_api_base: String,

    /// Comma-separated list of recipients
    #[arg(long, env = "MAIL_RECIPIENT", default_value = "", global = true)]
    pub mail_recipients: String,

    /// Address the daily mail is sent from
    #[arg(long, env = "EMAIL_SENDER", default_value = "no-reply@daily-panda.site", global = true)]
    pub email_sender: String,

    /// Send the daily mail
    #[arg(long, env = "SEND_EMAIL", value_parser = BoolishValueParser::new(), global = true)]
    pub send_mail: bool,

    /// Mail recipients when no panda could be found
    #[arg(long, env = "NOTIFY_ON_FAILURE", value_parser = BoolishValueParser::new(), global = true)]
    pub notify_on_failure: bool,

    /// Cloudinary cloud name
    #[arg(long, env = "CD_CLOUD_NAME", default_value = "", global = true)]
    pub cd_cloud_name: String,

    /// Cloudinary unsigned upload preset
    #[arg(long, env = "CD_UPLOAD_PRESET", default_value = "", global = true)]
    pub cd_upload_preset: String,

    /// Cloudinary API key (signed requests only)
    #[arg(long, env = "CD_API_KEY", default_value = "", hide_env_values = true, global = true)]
    pub cd_api_key: String,

    /// Cloudinary API secret (signed requests only)
    #[arg(long, env = "CD_API_SECRET", default_value = "", hide_env_values = true, global = true)]
    pub cd_api_secret: String,

    /// Cloudinary API base URL
    #[arg(long, env = "CD_API_BASE", default_value = "https://api.cloudinary.com/v1_1", global = true)]
    pub cd_api_base: String,

    /// MongoDB connection string
    #[arg(long, env = "MONGO_URL", default_value = "", hide_env_values = true, global = true)]
    pub mongo_url: String,

    /// MongoDB database name
    #[arg(long, env = "MONGO_DATABASE", default_value = "", global = true)]
    pub mongo_database: String,
}

impl Settings {
    /// Recipients split out of the comma-separated setting.
    pub fn recipients(&self) -> Vec<String> {
        self.mail_recipients
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect()
    }
}
