//! CLI Module
//!
//! Configuration tooling for localserve.

use crate::config::Config;
use anyhow::{anyhow, Result};
use clap::Subcommand;
use std::path::Path;

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate configuration file
    Validate,
    /// Test configuration and show parsed result
    Test,
    /// Show default configuration
    ShowDefault,
}

/// Load the configuration file, or the defaults if it does not exist
pub fn load_config(config_path: &Path) -> Result<Config> {
    if config_path.exists() {
        Ok(Config::load(config_path)?)
    } else {
        Ok(Config::default())
    }
}

/// Handle configuration commands
pub fn handle_config_command(config_path: &Path, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Validate => {
            println!("Validating configuration: {:?}", config_path);
            if !config_path.exists() {
                println!("Configuration file not found, using defaults.");
                println!("Configuration is valid.");
                return Ok(());
            }

            match Config::load(config_path) {
                Ok(_) => {
                    println!("✓ Configuration is valid.");
                }
                Err(e) => {
                    println!("✗ Configuration error: {}", e);
                    return Err(anyhow!("Invalid configuration"));
                }
            }
        }
        ConfigCommand::Test => {
            println!("Testing configuration: {:?}", config_path);
            if !config_path.exists() {
                println!("(Using default configuration)");
            }
            let config = load_config(config_path)?;

            println!("\n=== Parsed Configuration ===\n");
            print!("{}", describe(&config));
            println!("\n✓ Configuration test passed.");
        }
        ConfigCommand::ShowDefault => {
            println!("{}", DEFAULT_CONFIG);
        }
    }
    Ok(())
}

/// Human-readable summary of a parsed configuration
pub fn describe(config: &Config) -> String {
    let mut out = String::new();
    let server = &config.server;

    out.push_str("[server]\n");
    out.push_str(&format!("  listen: {}\n", server.listen));
    out.push_str(&format!("  workers: {}\n", server.workers));
    out.push_str(&format!("  directory: {}\n", server.directory));
    out.push_str(&format!("  index: {}\n", server.index.join(", ")));
    out.push_str(&format!("  spa: {}\n", server.spa.as_deref().unwrap_or("disabled")));
    out.push_str(&format!("  max_age: {}s\n", server.max_age));
    out.push_str(&format!(
        "  pipeline: {}\n",
        server
            .pipeline
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    ));

    if !config.blacklist.is_empty() {
        out.push_str("\nblacklist\n");
        for pattern in &config.blacklist {
            out.push_str(&format!("  {}\n", pattern));
        }
    }

    if !config.rewrite.is_empty() {
        out.push_str("\n[[rewrite]]\n");
        for route in &config.rewrite {
            out.push_str(&format!("  {} -> {}\n", route.from, route.to));
        }
    }

    if !config.mime.is_empty() {
        out.push_str("\n[[mime]]\n");
        for entry in &config.mime {
            out.push_str(&format!("  {}: {}\n", entry.mime, entry.extensions.join(", ")));
        }
    }

    if !config.mock.is_empty() {
        out.push_str("\n[[mock]]\n");
        for mock in &config.mock {
            out.push_str(&format!("  {} ({} targets)\n", mock.route, mock.target.len()));
        }
    }

    out
}

const DEFAULT_CONFIG: &str = r#"# localserve configuration

# Forbidden paths, answered with 403
# blacklist = ["/.git/*", "/node_modules/*"]

[server]
listen = "127.0.0.1:8000"
workers = "auto"
directory = "."
index = ["index.html"]
# spa = "index.html"
max_age = 0
pipeline = ["rewrite", "blacklist", "mime", "mock"]

# Local rewrite
# [[rewrite]]
# from = "/old/:page"
# to = "/new/:page"

# Reverse proxy ($1 is the first positional capture)
# [[rewrite]]
# from = "/api/*"
# to = "http://127.0.0.1:3000/$1"

# [[mime]]
# type = "text/plain"
# extensions = ["md", "log"]

# [[mock]]
# route = "/users/:id"
#
# [[mock.target]]
# request = { method = "GET", accepts = "json" }
# response = { type = "application/json", template = '{"id": $1}' }
#
# [[mock.target]]
# response = { status = 405, body = "Method Not Allowed" }
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let uncommented: String = DEFAULT_CONFIG
            .lines()
            .map(|line| {
                line.strip_prefix("# ")
                    .filter(|l| l.starts_with('[') || l.contains(" = "))
                    .unwrap_or(line)
            })
            .filter(|line| !line.starts_with('#'))
            .collect::<Vec<_>>()
            .join("\n");

        let config = Config::from_str(&uncommented).unwrap();
        assert_eq!(config.blacklist.len(), 2);
        assert_eq!(config.rewrite.len(), 2);
        assert_eq!(config.mock[0].target.len(), 2);
    }

    #[test]
    fn test_describe() {
        let config = Config::from_str(
            r#"
            [[rewrite]]
            from = "/a"
            to = "/b"
            "#,
        )
        .unwrap();

        let text = describe(&config);
        assert!(text.contains("listen: 127.0.0.1:8000"));
        assert!(text.contains("pipeline: rewrite -> blacklist -> mime -> mock"));
        assert!(text.contains("/a -> /b"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:8000");
    }
}
