//! # Milestone Templates
//!
//! A template is a named draw schedule: milestone titles, each with a
//! percentage of the contract total and the evidence it requires.
//!
//! ## Allocation
//!
//! Amounts are computed from cumulative percentages in integer arithmetic:
//!
//! ```text
//! floor_k   = ⌊total × (p_1 + … + p_k) / 100⌋
//! amount_k  = floor_k − floor_{k−1}
//! ```
//!
//! The amounts therefore sum to exactly `⌊total × Σp / 100⌋`, and each one is
//! within one minor unit of `total × p_k / 100`. A percentage that rounds to
//! zero on a small total is rejected rather than producing an empty
//! milestone.

use std::collections::BTreeSet;

use mesc_core::{Amount, TemplateId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::EscrowError;
use crate::escrow::MilestoneSpec;
use crate::evidence::EvidenceType;

/// Name of the seeded residential template.
pub const RESIDENTIAL_REMODEL_STANDARD: &str = "Residential Remodel – Standard";

/// One line of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMilestone {
    /// Milestone title.
    pub title: String,
    /// Whole percentage of the contract total.
    pub percentage: u32,
    /// Evidence the generated milestone will require.
    pub required_evidence_types: BTreeSet<EvidenceType>,
}

/// A reusable draw schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneTemplate {
    /// Identifier.
    pub id: TemplateId,
    /// Unique display name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Lines in draw order.
    pub milestones: Vec<TemplateMilestone>,
}

impl MilestoneTemplate {
    /// Sum of all line percentages.
    pub fn total_percentage(&self) -> u32 {
        self.milestones.iter().map(|m| m.percentage).sum()
    }

    /// Expand the template against `total`.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::TemplateOverAllocation`] when percentages sum
    /// past 100, and [`EscrowError::Validation`] for an empty template or a
    /// line whose amount rounds to zero.
    pub fn allocate(&self, total: Amount) -> Result<Vec<MilestoneSpec>, EscrowError> {
        let total_percentage = self.total_percentage();
        if total_percentage > 100 {
            return Err(EscrowError::TemplateOverAllocation {
                template: self.name.clone(),
                total_percentage,
            });
        }
        if self.milestones.is_empty() {
            return Err(EscrowError::Validation(format!(
                "template {} has no milestones",
                self.name
            )));
        }

        let total = i128::from(total.minor_units());
        let mut cumulative_pct: i128 = 0;
        let mut previous_floor: i128 = 0;
        let mut specs = Vec::with_capacity(self.milestones.len());
        for line in &self.milestones {
            cumulative_pct += i128::from(line.percentage);
            let floor = total * cumulative_pct / 100;
            let share = floor - previous_floor;
            previous_floor = floor;
            // share ≤ total ≤ i64::MAX, so the conversion cannot fail.
            let share = i64::try_from(share).map_err(|_| {
                EscrowError::Validation(format!("{}: amount out of range", line.title))
            })?;
            if share <= 0 {
                return Err(EscrowError::Validation(format!(
                    "template milestone {} ({}%) rounds to zero on this total",
                    line.title, line.percentage
                )));
            }
            specs.push(MilestoneSpec {
                name: line.title.clone(),
                amount: Amount::positive("amount", share)?,
                required_evidence_types: line.required_evidence_types.clone(),
            });
        }
        Ok(specs)
    }
}

fn line(title: &str, percentage: u32, evidence: &[&str]) -> Result<TemplateMilestone, EscrowError> {
    Ok(TemplateMilestone {
        title: title.to_string(),
        percentage,
        required_evidence_types: evidence
            .iter()
            .map(EvidenceType::new)
            .collect::<Result<_, _>>()?,
    })
}

/// The residential remodel draw schedule every catalog starts with.
pub fn residential_remodel_standard() -> Result<MilestoneTemplate, EscrowError> {
    Ok(MilestoneTemplate {
        id: TemplateId::new(),
        name: RESIDENTIAL_REMODEL_STANDARD.to_string(),
        description: "Typical single-family renovation draw schedule \
                      (Foundation -> Framing -> Rough-In -> Finish -> Retainage)"
            .to_string(),
        milestones: vec![
            line("Foundation", 20, &["PHOTO", "INSPECTION"])?,
            line("Framing", 25, &["PHOTO"])?,
            line("Mechanical / Rough-In", 20, &["PERMIT"])?,
            line("Finish Work", 25, &["PHOTO"])?,
            line("Final / Retainage", 10, &["INSPECTION"])?,
        ],
    })
}

/// Shared, thread-safe registry of templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: Arc<RwLock<Vec<MilestoneTemplate>>>,
}

impl TemplateCatalog {
    /// An empty catalog.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A catalog holding the seeded templates.
    ///
    /// # Errors
    ///
    /// Only fails if the built-in template data is malformed.
    pub fn seeded() -> Result<Self, EscrowError> {
        let catalog = Self::empty();
        catalog.register(residential_remodel_standard()?)?;
        Ok(catalog)
    }

    /// All templates in registration order.
    pub fn list(&self) -> Vec<MilestoneTemplate> {
        self.templates.read().clone()
    }

    /// Fetch by id.
    pub fn get(&self, id: TemplateId) -> Option<MilestoneTemplate> {
        self.templates.read().iter().find(|t| t.id == id).cloned()
    }

    /// Fetch by exact or case-insensitive name.
    pub fn find_by_name(&self, name: &str) -> Option<MilestoneTemplate> {
        let wanted = name.trim();
        self.templates
            .read()
            .iter()
            .find(|t| t.name == wanted || t.name.eq_ignore_ascii_case(wanted))
            .cloned()
    }

    /// Add a template.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::TemplateOverAllocation`] if its percentages
    /// exceed 100, and [`EscrowError::Validation`] if it is empty, a line has
    /// no title, zero percentage or no evidence types, or the name is taken.
    pub fn register(&self, template: MilestoneTemplate) -> Result<TemplateId, EscrowError> {
        if template.name.trim().is_empty() {
            return Err(EscrowError::Validation("template name must be non-empty".into()));
        }
        if template.milestones.is_empty() {
            return Err(EscrowError::Validation(format!(
                "template {} has no milestones",
                template.name
            )));
        }
        for m in &template.milestones {
            if m.title.trim().is_empty() || m.percentage == 0 || m.required_evidence_types.is_empty() {
                return Err(EscrowError::Validation(format!(
                    "template {}: each line needs a title, a positive percentage, and evidence types",
                    template.name
                )));
            }
        }
        let total_percentage = template.total_percentage();
        if total_percentage > 100 {
            return Err(EscrowError::TemplateOverAllocation {
                template: template.name,
                total_percentage,
            });
        }
        let mut templates = self.templates.write();
        if templates.iter().any(|t| t.name == template.name) {
            return Err(EscrowError::Validation(format!(
                "template {} already exists",
                template.name
            )));
        }
        let id = template.id;
        templates.push(template);
        Ok(id)
    }
}
