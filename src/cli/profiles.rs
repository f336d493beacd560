//! Profiles subcommand implementation.
//!
//! Handles the `netdocs profiles` command for inspecting command profiles.

use super::{Context, OutputFormat};
use crate::config::ProfileManager;
use crate::error::CliResult;
use crate::output::{self, truncate_string};
use clap::{Parser, Subcommand};

/// Inspect vendor command profiles.
#[derive(Parser, Debug)]
pub struct ProfilesCommand {
    #[command(subcommand)]
    pub action: ProfilesAction,
}

/// Profile actions.
#[derive(Subcommand, Debug)]
pub enum ProfilesAction {
    /// List all available profiles
    List,

    /// Show the resolved command battery of a profile
    Show {
        /// Profile name
        name: String,

        #[arg(short, long, value_enum, default_value = "plain")]
        output: OutputFormat,
    },
}

impl ProfilesCommand {
    pub fn execute(&self, ctx: &Context) -> CliResult<()> {
        let manager = ProfileManager::load(&ctx.paths)?;
        match &self.action {
            ProfilesAction::List => list_profiles(&manager, ctx.quiet),
            ProfilesAction::Show { name, output } => show_profile(&manager, name, *output),
        }
    }
}

fn list_profiles(manager: &ProfileManager, quiet: bool) -> CliResult<()> {
    let profiles = manager.list();
    if !quiet {
        println!("\n{:<16} {:<14} {:>8}  {}", "NAME", "EXTENDS", "COMMANDS", "DESCRIPTION");
        println!("{}", "-".repeat(70));
    }

    for profile in profiles {
        let commands = manager
            .resolve(&profile.name)
            .map(|r| r.commands.len().to_string())
            .unwrap_or_else(|_| "!".to_string());
        println!(
            "{:<16} {:<14} {:>8}  {}",
            profile.name,
            profile.extends.as_deref().unwrap_or("-"),
            commands,
            truncate_string(&profile.description, 36)
        );
    }

    if !quiet {
        println!();
    }
    Ok(())
}

fn show_profile(manager: &ProfileManager, name: &str, format: OutputFormat) -> CliResult<()> {
    let resolved = manager.resolve(name)?;
    if format == OutputFormat::Json {
        output::print_json(&resolved)?;
        return Ok(());
    }

    println!("\nProfile: {}", resolved.name);
    println!("{}", "=".repeat(40));
    if let Some(profile) = manager.get(name) {
        if !profile.description.is_empty() {
            println!("Description:  {}", profile.description);
        }
        if let Some(parent) = &profile.extends {
            println!("Extends:      {}", parent);
        }
    }
    println!("Pre-enable:   {}", if resolved.pre_enable { "yes" } else { "no" });
    println!("Commands:");
    for (i, command) in resolved.commands.iter().enumerate() {
        println!("  {:>2}. {}", i + 1, command);
    }
    println!();
    Ok(())
}
