//! Static task catalog: which tasks exist, grouped by category, and the
//! milestone labels shown as the user progresses.

use crate::errors::CatalogError;
use crate::models::Task;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub min_count: u32,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub key: String,
    pub title: String,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub categories: Vec<Category>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
}

impl Catalog {
    pub fn new(categories: Vec<Category>, milestones: Vec<Milestone>) -> Result<Self, CatalogError> {
        let catalog = Self {
            categories,
            milestones,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    pub async fn load(path: &Path) -> Result<Self, CatalogError> {
        let bytes = fs::read(path).await?;
        let catalog: Catalog = serde_json::from_slice(&bytes)?;
        catalog.validate()?;
        info!(path = %path.display(), tasks = catalog.total_tasks(), "catalog loaded");
        Ok(catalog)
    }

    pub fn category(&self, key: &str) -> Option<&Category> {
        self.categories.iter().find(|category| category.key == key)
    }

    pub fn tasks_in(&self, key: &str) -> &[Task] {
        self.category(key)
            .map(|category| category.tasks.as_slice())
            .unwrap_or_default()
    }

    pub fn total_tasks(&self) -> usize {
        self.categories.iter().map(|category| category.tasks.len()).sum()
    }

    fn validate(&self) -> Result<(), CatalogError> {
        for category in &self.categories {
            let mut seen = HashSet::new();
            for task in &category.tasks {
                if task.category != category.key {
                    return Err(CatalogError::CategoryMismatch {
                        id: task.id.clone(),
                        expected: category.key.clone(),
                        actual: task.category.clone(),
                    });
                }
                if !seen.insert(task.id.as_str()) {
                    return Err(CatalogError::DuplicateTask {
                        category: category.key.clone(),
                        id: task.id.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for Catalog {
    /// Four weeks of Windows Server lab work.
    fn default() -> Self {
        let week = |key: &str, title: &str, tasks: &[(&str, &str, Option<u32>)]| Category {
            key: key.to_string(),
            title: title.to_string(),
            tasks: tasks
                .iter()
                .map(|(id, title, subtasks)| Task {
                    id: (*id).to_string(),
                    category: key.to_string(),
                    title: (*title).to_string(),
                    subtask_count: *subtasks,
                })
                .collect(),
        };

        Self {
            categories: vec![
                week(
                    "week1",
                    "Week 1: Installation",
                    &[
                        ("week1-install-server2012", "Install Windows Server 2012", Some(3)),
                        ("week1-configure-network", "Configure static networking", Some(2)),
                        ("week1-rename-host", "Rename the host and join a workgroup", None),
                    ],
                ),
                week(
                    "week2",
                    "Week 2: Active Directory",
                    &[
                        ("week2-promote-dc", "Promote a domain controller", Some(2)),
                        ("week2-create-ous", "Create organisational units", None),
                        ("week2-bulk-users", "Bulk-create users with PowerShell", None),
                    ],
                ),
                week(
                    "week3",
                    "Week 3: Core services",
                    &[
                        ("week3-dns-zones", "Configure forward and reverse DNS zones", Some(2)),
                        ("week3-dhcp-scope", "Authorise DHCP and define a scope", None),
                    ],
                ),
                week(
                    "week4",
                    "Week 4: Policy and shares",
                    &[
                        ("week4-group-policy", "Apply a password Group Policy", None),
                        ("week4-file-shares", "Publish permissioned file shares", Some(2)),
                        ("week4-backup", "Schedule Windows Server Backup", None),
                    ],
                ),
            ],
            milestones: vec![
                Milestone {
                    min_count: 11,
                    label: "Lab complete".to_string(),
                },
                Milestone {
                    min_count: 8,
                    label: "Final stretch".to_string(),
                },
                Milestone {
                    min_count: 4,
                    label: "Building momentum".to_string(),
                },
                Milestone {
                    min_count: 1,
                    label: "Getting started".to_string(),
                },
            ],
        }
    }
}
