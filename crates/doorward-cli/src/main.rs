use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;

mod client;

use client::DaemonClient;

#[derive(Parser, Debug)]
#[command(name = "doorward", about = "doorward face-recognition door lock CLI")]
struct Cli {
    /// Base URL of the doorwardd HTTP API
    #[arg(long, env = "DOORWARD_URL", default_value = "http://127.0.0.1:5000")]
    url: String,

    /// Request timeout in seconds (rebuilds can take a while)
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Enroll a household member from a photo
    Enroll {
        /// Member name; re-enrolling a name replaces its photo
        #[arg(short, long)]
        name: String,
        /// JPEG or PNG photo showing the member's face
        photo: PathBuf,
    },
    /// Classify the faces in an image
    Recognize {
        image: PathBuf,
    },
    /// List enrolled photos
    List,
    /// Remove an enrolled member
    Remove {
        name: String,
    },
    /// Rebuild the gallery from the enrolled photos
    Rebuild,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = DaemonClient::new(&cli.url, Duration::from_secs(cli.timeout))?;
    tracing::debug!(url = %cli.url, command = ?cli.command, "calling doorwardd");

    match cli.command {
        Commands::Enroll { name, photo } => {
            let outcome = client.enroll(&name, &photo).await?;
            match outcome["status"].as_str() {
                Some("enrolled") => println!("Enrolled {name}"),
                _ => println!("Stored photo for {name}, but no face was found in it"),
            }
            print_warnings(&outcome);
            println!("Members: {}", join_names(&outcome["members"]));
        }
        Commands::Recognize { image } => {
            let result = client.recognize(&image).await?;
            match result["result"].as_str() {
                Some("known") => println!("Known: {}", result["name"].as_str().unwrap_or("?")),
                Some("unknown") => println!("Unknown person"),
                Some("no_face") => println!("No face detected"),
                _ => println!("{result}"),
            }
        }
        Commands::List => {
            let listing = client.members().await?;
            let members = listing["members"].as_array().cloned().unwrap_or_default();
            if members.is_empty() {
                println!("No members enrolled");
            }
            for member in members {
                let marker = if member["recognized"].as_bool().unwrap_or(false) {
                    ""
                } else {
                    "  (no face)"
                };
                println!(
                    "{:<24} {}{marker}",
                    member["name"].as_str().unwrap_or("?"),
                    member["file"].as_str().unwrap_or("?"),
                );
            }
        }
        Commands::Remove { name } => {
            let outcome = client.remove(&name).await?;
            println!("Removed {name}");
            println!("Members: {}", join_names(&outcome["members"]));
        }
        Commands::Rebuild => {
            let summary = client.rebuild().await?;
            println!(
                "Rebuilt gallery generation {}: {} member(s) from {} photo(s)",
                summary["generation"],
                summary["members"].as_array().map_or(0, Vec::len),
                summary["scanned"],
            );
            print_warnings(&summary);
        }
        Commands::Status => {
            let status = client.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

fn join_names(members: &Value) -> String {
    let names: Vec<&str> = members
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if names.is_empty() {
        "(none)".to_owned()
    } else {
        names.join(", ")
    }
}

fn print_warnings(body: &Value) {
    for warning in body["warnings"].as_array().into_iter().flatten() {
        eprintln!(
            "warning: {} ({})",
            warning["file"].as_str().unwrap_or("?"),
            warning["kind"].as_str().unwrap_or("?"),
        );
    }
}
