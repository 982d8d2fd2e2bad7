use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "badger", about = "badger face identification CLI")]
struct Cli {
    /// Base URL of a running badgerd.
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a reference photo for an employee (replaces prior photos) and retrain
    Enroll {
        /// Employee number (1-based)
        employee: u32,
        /// Photo file to upload
        photo: PathBuf,
    },
    /// Identify the person in a photo
    Recognize {
        /// Photo file to upload
        photo: PathBuf,
    },
    /// Retrain the model, globally or for one employee
    Train {
        /// Restrict the trigger to one employee
        #[arg(long)]
        employee: Option<u32>,
    },
    /// List enrolled employees
    Employees,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let response = match cli.command {
        Commands::Enroll { employee, photo } => {
            let url = format!("{}/employees/{employee}/photos", cli.url);
            client
                .post(url)
                .multipart(photo_form(&photo)?)
                .send()
                .await?
        }
        Commands::Recognize { photo } => {
            client
                .post(format!("{}/recognize", cli.url))
                .multipart(photo_form(&photo)?)
                .send()
                .await?
        }
        Commands::Train { employee } => {
            let url = match employee {
                Some(employee) => format!("{}/employees/{employee}/train", cli.url),
                None => format!("{}/train", cli.url),
            };
            client.post(url).send().await?
        }
        Commands::Employees => client.get(format!("{}/employees", cli.url)).send().await?,
        Commands::Status => client.get(format!("{}/status", cli.url)).send().await?,
    };

    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .context("daemon returned a non-JSON response")?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        bail!("request failed with status {status}");
    }
    Ok(())
}

fn photo_form(photo: &Path) -> Result<reqwest::multipart::Form> {
    let bytes =
        std::fs::read(photo).with_context(|| format!("could not read {}", photo.display()))?;
    let file_name = photo
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "photo.jpg".to_string());
    let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
    Ok(reqwest::multipart::Form::new().part("image", part))
}
