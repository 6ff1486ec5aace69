mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, Commands};
use dumont::reconciler::DeployReport;
use dumont::{ContainerView, Dumont, DumontConfig, auth};
use tokio::io::AsyncReadExt;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = DumontConfig::load(cli.config.as_deref())?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    let _log_guard = config.logging.init()?;

    if let Some(data_dir) = &cli.data_dir {
        config.registry.data_dir = data_dir.clone();
    }

    if let Commands::HashPassword { password } = &cli.command {
        let password = match password {
            Some(password) => password.clone(),
            None => read_input("-").await?.trim_end_matches(['\r', '\n']).to_string(),
        };
        println!("{}", auth::hash_password(&password));
        return Ok(());
    }

    info!("🚀 Dumont starting up...");

    if let Commands::Serve { bind, static_dir } = &cli.command {
        if let Some(bind) = bind {
            let (host, port) = cli::parse_bind(bind).map_err(anyhow::Error::msg)?;
            config.server.bind_address = host;
            if let Some(port) = port {
                config.server.port = port;
            }
        }
        if static_dir.is_some() {
            config.server.static_dir = static_dir.clone();
        }
    }

    let dumont = Dumont::from_config(config).await?;

    match cli.command {
        Commands::Serve { .. } => {
            dumont.serve().await?;
        }

        Commands::Deploy { name, file } => {
            let text = read_input(&file).await?;
            let report = dumont.save_and_deploy(&name, &text).await?;
            print_report(&report);
            if !report.is_success() {
                bail!("{} services failed to deploy", report.failed.len());
            }
        }

        Commands::Redeploy { name } => {
            let report = dumont
                .reconciler()
                .redeploy(&name)
                .await?
                .with_context(|| format!("group '{}' not found", name))?;
            print_report(&report);
            if !report.is_success() {
                bail!("{} services failed to deploy", report.failed.len());
            }
        }

        Commands::Ps { group } => {
            let containers: Vec<ContainerView> = dumont
                .containers()
                .await?
                .into_iter()
                .filter(|c| group.is_none() || c.group == group)
                .collect();

            if containers.is_empty() {
                info!("No containers found");
                return Ok(());
            }

            println!(
                "{:<12} {:<25} {:<25} {:<10} {:<15} {:<30}",
                "CONTAINER ID", "NAME", "IMAGE", "STATUS", "GROUP", "PORTS"
            );
            println!("{}", "─".repeat(120));
            for container in &containers {
                println!(
                    "{:<12} {:<25} {:<25} {:<10} {:<15} {:<30}",
                    container.id.chars().take(12).collect::<String>(),
                    container.name,
                    container.image,
                    container.status,
                    container.group.as_deref().unwrap_or("-"),
                    container.ports.join(", ")
                );
            }
        }

        Commands::Stop { id } => {
            dumont.query().stop(&id).await?;
            println!("{}", id);
        }

        Commands::Rm { id } => {
            dumont.query().delete(&id).await?;
            println!("{}", id);
        }

        Commands::Rename { id, new_name } => {
            dumont.query().rename(&id, &new_name).await?;
            println!("{} -> {}", id, new_name);
        }

        Commands::Groups { name: Some(name) } => {
            let entry = dumont.group(&name).await?;
            println!("📦 {} (version {})", entry.spec.name, entry.spec.version);
            println!("   updated {}", entry.spec.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
            for service in &entry.spec.services {
                let running = entry
                    .managed
                    .iter()
                    .find(|m| m.service_name == service.service_name);
                match running {
                    Some(m) => println!(
                        "   • {:<15} {:<25} {} ({})",
                        service.service_name,
                        service.image,
                        m.status,
                        m.runtime_id.chars().take(12).collect::<String>()
                    ),
                    None => println!("   • {:<15} {:<25} not running", service.service_name, service.image),
                }
            }
        }

        Commands::Groups { name: None } => {
            let groups = dumont.groups().await;
            if groups.is_empty() {
                info!("No groups found");
                return Ok(());
            }
            println!(
                "{:<25} {:<8} {:<9} {:<8} {:<20}",
                "GROUP", "VERSION", "SERVICES", "MANAGED", "UPDATED"
            );
            for group in &groups {
                println!(
                    "{:<25} {:<8} {:<9} {:<8} {:<20}",
                    group.name,
                    group.version,
                    group.services,
                    group.managed,
                    group.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        Commands::Down { name } => {
            let report = dumont.teardown(&name).await?;
            print_report(&report);
            if !report.is_success() {
                bail!("{} containers could not be removed", report.failed.len());
            }
        }

        Commands::HashPassword { .. } => {}
    }

    Ok(())
}

async fn read_input(file: &str) -> Result<String> {
    if file == "-" {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("Failed to read stdin")?;
        Ok(text)
    } else {
        tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {}", file))
    }
}

fn print_report(report: &DeployReport) {
    println!("{}", report);
    for outcome in &report.created {
        println!("  + {:<15} {}", outcome.service, outcome.runtime_id);
    }
    for outcome in &report.replaced {
        println!(
            "  ~ {:<15} {} (was {})",
            outcome.service,
            outcome.runtime_id,
            outcome.previous_id.as_deref().unwrap_or("?")
        );
    }
    for outcome in &report.removed {
        println!("  - {:<15} {}", outcome.service, outcome.runtime_id);
    }
    for outcome in &report.unchanged {
        println!("  = {:<15} {}", outcome.service, outcome.runtime_id);
    }
    for failure in &report.failed {
        println!("  ✗ {:<15} {} failed: {}", failure.service, failure.action, failure.error);
    }
}
