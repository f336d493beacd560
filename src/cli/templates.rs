//! Templates subcommand implementation.

use super::{Context, OutputFormat};
use crate::error::CliResult;
use crate::output::{self, truncate_string};
use crate::parser::{Template, TemplateSpec};
use clap::{Parser, Subcommand};

/// Inspect parse templates.
#[derive(Parser, Debug)]
pub struct TemplatesCommand {
    #[command(subcommand)]
    pub action: TemplatesAction,
}

#[derive(Subcommand, Debug)]
pub enum TemplatesAction {
    /// List built-in and user templates
    List {
        /// Only templates usable for this vendor
        #[arg(long, value_name = "VENDOR")]
        vendor: Option<String>,

        #[arg(short, long, value_enum, default_value = "plain")]
        output: OutputFormat,
    },
}

impl TemplatesCommand {
    pub fn execute(&self, ctx: &Context) -> CliResult<()> {
        let TemplatesAction::List { vendor, output } = &self.action;
        let set = ctx.templates(&ctx.settings)?;
        let templates: Vec<&Template> = set
            .list()
            .into_iter()
            .filter(|t| vendor.as_deref().map_or(true, |v| t.supports_vendor(v)))
            .collect();

        if *output == OutputFormat::Json {
            let specs: Vec<&TemplateSpec> = templates.iter().map(|t| t.spec()).collect();
            output::print_json(&specs)?;
            return Ok(());
        }

        if !ctx.quiet {
            println!(
                "\n{:<44} {:<11} {:<36} {}",
                "NAME", "KIND", "COMMAND", "VENDORS"
            );
            println!("{}", "-".repeat(110));
        }
        for template in &templates {
            let vendors = if template.vendors().is_empty() {
                "any".to_string()
            } else {
                template.vendors().join(",")
            };
            println!(
                "{:<44} {:<11} {:<36} {}",
                truncate_string(template.name(), 44),
                template.kind().to_string(),
                truncate_string(template.command(), 36),
                vendors
            );
        }
        if !ctx.quiet {
            println!("\n{} templates", templates.len());
        }
        Ok(())
    }
}
