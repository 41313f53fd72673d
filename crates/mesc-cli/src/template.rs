//! # Template Subcommand
//!
//! Inspect the seeded milestone template catalog and preview how a template
//! splits a contract total. Previews use the same cumulative floor rounding
//! as `apply-template` on the API, so the amounts printed here are exactly
//! what an escrow would receive.

use std::io::Write;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use mesc_core::{Amount, TemplateId};
use mesc_escrow::{MilestoneSpec, MilestoneTemplate, TemplateCatalog};

use crate::OutputFormat;

/// Arguments for the `mesc template` subcommand.
#[derive(Args, Debug)]
pub struct TemplateArgs {
    #[command(subcommand)]
    pub command: TemplateCommand,
}

/// Template subcommands.
#[derive(Subcommand, Debug)]
pub enum TemplateCommand {
    /// Print the template catalog.
    List {
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Expand a template against a contract total.
    Preview {
        /// Template id or name (case-insensitive).
        #[arg(value_name = "TEMPLATE_ID|NAME")]
        template: String,
        /// Contract total in minor units (cents).
        #[arg(long, value_name = "AMOUNT")]
        total: i64,
        /// Structured output instead of the text table.
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
}

/// Execute the template subcommand.
pub fn run_template(args: &TemplateArgs) -> Result<u8> {
    let catalog = TemplateCatalog::seeded().context("failed to load template catalog")?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match &args.command {
        TemplateCommand::List { format } => cmd_list(&catalog, *format, &mut out),
        TemplateCommand::Preview {
            template,
            total,
            format,
        } => cmd_preview(&catalog, template, *total, *format, &mut out),
    }
}

fn cmd_list(catalog: &TemplateCatalog, format: OutputFormat, out: &mut impl Write) -> Result<u8> {
    writeln!(out, "{}", format.render(&catalog.list())?)?;
    Ok(0)
}

/// Resolve `key` as a template id first, then as a name.
pub fn resolve_template(catalog: &TemplateCatalog, key: &str) -> Option<MilestoneTemplate> {
    uuid::Uuid::parse_str(key.trim())
        .ok()
        .and_then(|id| catalog.get(TemplateId::from_uuid(id)))
        .or_else(|| catalog.find_by_name(key))
}

fn cmd_preview(
    catalog: &TemplateCatalog,
    key: &str,
    total: i64,
    format: Option<OutputFormat>,
    out: &mut impl Write,
) -> Result<u8> {
    let Some(template) = resolve_template(catalog, key) else {
        writeln!(out, "NOT FOUND: template {key}")?;
        return Ok(1);
    };
    let total = Amount::positive("total", total)?;
    let specs = template
        .allocate(total)
        .with_context(|| format!("cannot allocate {} over {total}", template.name))?;

    match format {
        Some(format) => writeln!(out, "{}", format.render(&specs)?)?,
        None => write_table(&template, total, &specs, out)?,
    }
    Ok(0)
}

fn write_table(
    template: &MilestoneTemplate,
    total: Amount,
    specs: &[MilestoneSpec],
    out: &mut impl Write,
) -> Result<()> {
    writeln!(out, "{} (total {total})", template.name)?;
    let width = specs.iter().map(|s| s.name.chars().count()).max().unwrap_or(0);
    for (line, spec) in template.milestones.iter().zip(specs) {
        let evidence: Vec<&str> = spec
            .required_evidence_types
            .iter()
            .map(|e| e.as_str())
            .collect();
        writeln!(
            out,
            "  {:<width$}  {:>3}%  {:>14}  {}",
            spec.name,
            line.percentage,
            spec.amount.to_string(),
            evidence.join(",")
        )?;
    }
    let allocated = Amount::checked_sum(specs.iter().map(|s| s.amount))?;
    writeln!(out, "  allocated {allocated} of {total}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_preview(key: &str, total: i64, format: Option<OutputFormat>) -> (u8, String) {
        let catalog = TemplateCatalog::seeded().unwrap();
        let mut buf = Vec::new();
        let code = cmd_preview(&catalog, key, total, format, &mut buf).unwrap();
        (code, String::from_utf8(buf).unwrap())
    }

    #[test]
    fn preview_by_name_prints_every_line() {
        let (code, text) = render_preview("residential remodel – standard", 1_000_000, None);
        assert_eq!(code, 0);
        assert!(text.contains("Foundation"));
        assert!(text.contains("2000.00"));
        assert!(text.contains("allocated 10000.00 of 10000.00"));
    }

    #[test]
    fn preview_by_id_matches_catalog_entry() {
        let catalog = TemplateCatalog::seeded().unwrap();
        let id = catalog.list()[0].id.to_string();
        let mut buf = Vec::new();
        assert_eq!(cmd_preview(&catalog, &id, 100, None, &mut buf).unwrap(), 0);
    }

    #[test]
    fn preview_json_amounts_sum_to_total_when_fully_allocated() {
        let (code, text) = render_preview(
            mesc_escrow::RESIDENTIAL_REMODEL_STANDARD,
            1_001,
            Some(OutputFormat::Json),
        );
        assert_eq!(code, 0);
        let specs: Vec<MilestoneSpec> = serde_json::from_str(&text).unwrap();
        assert_eq!(specs.len(), 5);
        let sum: i64 = specs.iter().map(|s| s.amount.minor_units()).sum();
        assert_eq!(sum, 1_001);
    }

    #[test]
    fn unknown_template_exits_one() {
        let (code, text) = render_preview("Kitchen Deluxe", 1_000, None);
        assert_eq!(code, 1);
        assert!(text.contains("NOT FOUND"));
    }

    #[test]
    fn non_positive_total_is_an_error() {
        let catalog = TemplateCatalog::seeded().unwrap();
        let mut buf = Vec::new();
        assert!(cmd_preview(&catalog, mesc_escrow::RESIDENTIAL_REMODEL_STANDARD, 0, None, &mut buf).is_err());
    }

    #[test]
    fn total_too_small_for_every_line_is_an_error() {
        let catalog = TemplateCatalog::seeded().unwrap();
        let mut buf = Vec::new();
        assert!(cmd_preview(&catalog, mesc_escrow::RESIDENTIAL_REMODEL_STANDARD, 3, None, &mut buf).is_err());
    }

    #[test]
    fn list_renders_yaml() {
        let catalog = TemplateCatalog::seeded().unwrap();
        let mut buf = Vec::new();
        cmd_list(&catalog, OutputFormat::Yaml, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("percentage: 20"));
    }
}
