// SPDX-License-Identifier: Apache-2.0

//! `orchctl`: a thin, read-only operator client over a manager's HTTP API.
//! Not a control plane of its own; today it only lists nodes.

use anyhow::Result;
use clap::{Parser, Subcommand};
use common::Node;

#[derive(Parser, Debug)]
#[command(name = "orchctl")]
#[command(about = "A CLI to interact with the orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the nodes a manager knows about.
    Node {
        /// Manager to talk to
        #[arg(short, long, default_value = "localhost:5555")]
        manager: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Node { manager } => print_nodes(&manager).await,
    }
}

async fn print_nodes(manager: &str) -> Result<()> {
    let url = format!("http://{manager}/nodes");
    let nodes: Vec<Node> = reqwest::get(&url).await?.json().await?;

    println!("NAME\tMEMORY (MiB)\tDISK (GiB)\tROLE\tTASKS");
    for node in nodes {
        println!(
            "{}\t{}\t{}\t{:?}\t{}",
            node.name,
            node.memory / (1024 * 1024),
            node.disk / (1024 * 1024 * 1024),
            node.role,
            node.task_count
        );
    }
    Ok(())
}
