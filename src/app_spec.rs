//! Strict application spec types
//!
//! Everything past the decode boundary (`decode_spec`) works with these
//! types only; raw model JSON never travels further.

mod decode;

pub use decode::{decode_entities, decode_spec};

use crate::error::{ForgeError, ForgeResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    pub name: String,
    pub description: String,
    /// The data schema
    pub entities: Vec<Entity>,
    pub views: Vec<View>,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
}

impl AppSpec {
    /// Reject specs that cannot be built
    pub fn validate(&self) -> ForgeResult<()> {
        if self.entities.is_empty() {
            return Err(ForgeError::validation(
                "The app spec has no data entities to build",
            ));
        }
        if let Some(entity) = self.entities.iter().find(|e| e.fields.is_empty()) {
            return Err(ForgeError::validation(format!(
                "Entity '{}' has no fields",
                entity.name
            )));
        }
        if self.views.is_empty() {
            return Err(ForgeError::validation("The app spec has no views"));
        }
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_entity(&self) -> Option<&Entity> {
        self.entities.first()
    }

    /// Merge entities by name; unknown entities are appended, known ones
    /// gain the fields they are missing.
    pub fn merge_entities(&mut self, incoming: &[Entity]) {
        for entity in incoming {
            match self
                .entities
                .iter_mut()
                .find(|e| e.name.eq_ignore_ascii_case(&entity.name))
            {
                Some(existing) => {
                    for field in &entity.fields {
                        if existing.field(&field.name).is_none() {
                            existing.fields.push(field.clone());
                        }
                    }
                }
                None => self.entities.push(entity.clone()),
            }
        }
    }

    pub fn merge_workflows(&mut self, incoming: &[Workflow]) {
        for workflow in incoming {
            if !self.workflows.iter().any(|w| w.name == workflow.name) {
                self.workflows.push(workflow.clone());
            }
        }
    }

    /// Minimal buildable spec used when nothing usable could be decoded
    pub fn minimal(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            entities: vec![Entity {
                name: "Record".to_string(),
                fields: vec![
                    FieldDefinition::new("id", FieldType::Text, true),
                    FieldDefinition::new("name", FieldType::Text, true),
                ],
            }],
            views: vec![View {
                name: "All records".to_string(),
                kind: ViewKind::Table,
                entity: "Record".to_string(),
            }],
            layout: Layout::default(),
            workflows: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub fields: Vec<FieldDefinition>,
}

impl Entity {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// First enum field, used for grouping (kanban) and status workflows
    pub fn status_field(&self) -> Option<&FieldDefinition> {
        self.fields
            .iter()
            .find(|f| matches!(f.field_type, FieldType::Enum { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(flatten)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType, required: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            required,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    Date,
    Enum { options: Vec<String> },
    Reference { entity: String },
}

impl FieldType {
    pub fn enumeration<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldType::Enum {
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    /// TypeScript rendering used by the fallback generator
    pub fn ts_type(&self) -> String {
        match self {
            FieldType::Text | FieldType::Reference { .. } => "string".to_string(),
            FieldType::Number => "number".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Date => "string".to_string(),
            FieldType::Enum { options } if options.is_empty() => "string".to_string(),
            FieldType::Enum { options } => options
                .iter()
                .map(|o| format!("\"{o}\""))
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    Table,
    Form,
    Detail,
    Dashboard,
    Kanban,
    Calendar,
}

impl ViewKind {
    pub fn label(self) -> &'static str {
        match self {
            ViewKind::Table => "Table",
            ViewKind::Form => "Form",
            ViewKind::Detail => "Detail",
            ViewKind::Dashboard => "Dashboard",
            ViewKind::Kanban => "Kanban board",
            ViewKind::Calendar => "Calendar",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    pub kind: ViewKind,
    pub entity: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Navigation {
    #[default]
    Sidebar,
    Tabs,
    Topbar,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub navigation: Navigation,
    pub theme: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            navigation: Navigation::default(),
            theme: "light".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub trigger: String,
    pub steps: Vec<String>,
}

/// Ordered build plan derived from a spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub title: String,
    /// Logical artifact component this step produces
    pub component: String,
}
