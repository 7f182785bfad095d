//! CLI tool for inspecting the mirror table
//!
//! Usage:
//!   mirrorproxy-mapping list [--json]
//!   mirrorproxy-mapping resolve <hostname>
//!   mirrorproxy-mapping check <file>

use anyhow::Result;
use clap::{Parser, Subcommand};
use mirrorproxy::MirrorConfig;
use std::path::PathBuf;

/// CLI tool for inspecting proxy domain mappings
#[derive(Parser, Debug)]
#[command(name = "mirrorproxy-mapping")]
#[command(author = "MirrorProxy Contributors")]
#[command(version = "1.0.0")]
#[command(about = "Inspect the domain mappings of MirrorProxy")]
struct Args {
    /// Mirror configuration file; the built-in table is used when absent
    #[arg(long, env = "MIRROR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List all mappings
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which upstream a hostname mirrors and how links are rewritten
    Resolve {
        /// Hostname as seen in the Host header (e.g., gh.mirror.example)
        hostname: String,
    },

    /// Validate a configuration file
    Check {
        /// Path to the JSON configuration
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::List { json } => {
            let config = MirrorConfig::load_or_builtin(args.config.as_ref())?;
            let mapping = config.build_mapping()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
                return Ok(());
            }

            let default = mapping.default_entry();
            println!("{:<40} {:<40}", "DOMAIN", "PREFIX");
            println!("{}", "-".repeat(81));
            println!("{:<40} {:<40}", default.target, format!("{} (default)", default.prefix));

            for entry in mapping.entries() {
                println!("{:<40} {:<40}", entry.domain, entry.prefix);
            }

            println!("\nTotal: {} mapping(s)", mapping.len());
            println!(
                "Redirects: {} -> {}",
                config.redirect.paths.join(", "),
                config.redirect.target
            );
        }

        Commands::Resolve { hostname } => {
            let config = MirrorConfig::load_or_builtin(args.config.as_ref())?;
            let mapping = config.build_mapping()?;
            let hostname = hostname.to_ascii_lowercase();

            let Some(prefix) = mapping.resolve(&hostname) else {
                eprintln!("Domain not configured for proxy: {}", hostname);
                std::process::exit(1);
            };
            let Some(target) = mapping.prefix_to_host(prefix) else {
                eprintln!("Prefix {} has no upstream domain", prefix);
                std::process::exit(1);
            };
            let suffix = &hostname[prefix.len()..];

            println!("  Hostname:   {}", hostname);
            println!("  Prefix:     {}", prefix);
            println!("  Upstream:   {}", target);
            println!("  Suffix:     {}", suffix);
            if mapping.is_default(prefix) {
                println!("  Same-origin rewriting of site-relative links");
            }
            println!("\n{:<40} {:<40}", "ORIGINAL", "PROXY");
            println!("{}", "-".repeat(81));
            for rule in mapping.rules(suffix) {
                println!("{:<40} {:<40}", rule.original_domain, rule.proxy_domain);
            }
        }

        Commands::Check { file } => {
            let config = MirrorConfig::load(&file)?;
            let mapping = config.build_mapping()?;
            println!(
                "{}: OK ({} mapping(s), {} redirect path(s))",
                file.display(),
                mapping.len(),
                config.redirect.paths.len()
            );
        }
    }

    Ok(())
}
