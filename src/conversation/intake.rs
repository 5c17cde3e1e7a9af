//! Deterministic intake: intent classification, clarification questions,
//! and spec/plan/proposal synthesis from accumulated answers.
//!
//! Nothing here calls a model, so every phase can complete model-free.

use super::readiness::ReadinessDelta;
use super::state::{Answer, DesignProposal, Question, QuestionType};
use crate::app_spec::{
    AppSpec, Entity, FieldDefinition, FieldType, Layout, Navigation, Plan, PlanStep, View,
    ViewKind, Workflow,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const FIELDS_QUESTION: &str = "fields";
pub const VIEWS_QUESTION: &str = "views";
pub const WORKFLOW_QUESTION: &str = "workflow";
pub const AUDIENCE_QUESTION: &str = "audience";

const NO_WORKFLOW: &str = "Nothing automatic";
const AUDIENCE_OPTIONS: [&str; 3] = ["Just me", "My team", "Customers"];
const VIEW_OPTIONS: [ViewKind; 4] = [
    ViewKind::Table,
    ViewKind::Kanban,
    ViewKind::Calendar,
    ViewKind::Dashboard,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Orders,
    Tasks,
    Inventory,
    Contacts,
    Events,
    Generic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentAnalysis {
    pub domain: Domain,
    pub app_name: String,
    /// Primary entity name
    pub entity: String,
    /// The user's own description
    pub summary: String,
}

struct WorkflowTemplate {
    name: &'static str,
    trigger: &'static str,
    steps: &'static [&'static str],
}

struct DomainTemplate {
    domain: Domain,
    keywords: &'static [&'static str],
    entity: &'static str,
    plural: &'static str,
    default_name: &'static str,
    status: (&'static str, &'static [&'static str]),
    base: &'static [(&'static str, Kind, bool)],
    optional: &'static [(&'static str, Kind)],
    workflows: &'static [WorkflowTemplate],
}

#[derive(Clone, Copy)]
enum Kind {
    Text,
    Number,
    Boolean,
    Date,
}

impl Kind {
    fn field_type(self) -> FieldType {
        match self {
            Kind::Text => FieldType::Text,
            Kind::Number => FieldType::Number,
            Kind::Boolean => FieldType::Boolean,
            Kind::Date => FieldType::Date,
        }
    }
}

const TEMPLATES: &[DomainTemplate] = &[
    DomainTemplate {
        domain: Domain::Orders,
        keywords: &["order", "orders", "shop", "cafe", "coffee", "restaurant", "sales", "menu", "bakery", "store"],
        entity: "Order",
        plural: "orders",
        default_name: "Order Tracker",
        status: ("status", &["pending", "preparing", "ready", "completed", "cancelled"]),
        base: &[
            ("customer_name", Kind::Text, true),
            ("items", Kind::Text, true),
            ("total", Kind::Number, true),
            ("ordered_at", Kind::Date, true),
        ],
        optional: &[
            ("notes", Kind::Text),
            ("pickup_time", Kind::Date),
            ("paid", Kind::Boolean),
            ("table_number", Kind::Number),
        ],
        workflows: &[
            WorkflowTemplate {
                name: "Notify customer when ready",
                trigger: "status:ready",
                steps: &["Look up the customer", "Send a ready notification"],
            },
            WorkflowTemplate {
                name: "Daily sales summary",
                trigger: "schedule:daily",
                steps: &["Total completed orders", "Email the summary"],
            },
        ],
    },
    DomainTemplate {
        domain: Domain::Tasks,
        keywords: &["task", "tasks", "todo", "todos", "project", "projects", "chores", "kanban", "sprint"],
        entity: "Task",
        plural: "tasks",
        default_name: "Task Board",
        status: ("status", &["todo", "in_progress", "done"]),
        base: &[
            ("title", Kind::Text, true),
            ("description", Kind::Text, false),
            ("due_date", Kind::Date, false),
        ],
        optional: &[
            ("assignee", Kind::Text),
            ("estimate_hours", Kind::Number),
            ("tags", Kind::Text),
            ("blocked", Kind::Boolean),
        ],
        workflows: &[
            WorkflowTemplate {
                name: "Remind before due date",
                trigger: "schedule:daily",
                steps: &["Find tasks due tomorrow", "Send a reminder"],
            },
            WorkflowTemplate {
                name: "Archive finished tasks",
                trigger: "status:done",
                steps: &["Wait seven days", "Archive the task"],
            },
        ],
    },
    DomainTemplate {
        domain: Domain::Inventory,
        keywords: &["inventory", "stock", "warehouse", "product", "products", "supplies", "parts"],
        entity: "Item",
        plural: "items",
        default_name: "Inventory Manager",
        status: ("status", &["in_stock", "low_stock", "out_of_stock"]),
        base: &[
            ("name", Kind::Text, true),
            ("sku", Kind::Text, true),
            ("quantity", Kind::Number, true),
            ("location", Kind::Text, false),
        ],
        optional: &[
            ("unit_cost", Kind::Number),
            ("supplier", Kind::Text),
            ("reorder_level", Kind::Number),
            ("expires_on", Kind::Date),
        ],
        workflows: &[
            WorkflowTemplate {
                name: "Alert on low stock",
                trigger: "status:low_stock",
                steps: &["Notify the buyer", "Draft a reorder"],
            },
            WorkflowTemplate {
                name: "Weekly stock report",
                trigger: "schedule:weekly",
                steps: &["Count items per location", "Email the report"],
            },
        ],
    },
    DomainTemplate {
        domain: Domain::Contacts,
        keywords: &["contact", "contacts", "crm", "client", "clients", "lead", "leads", "customers", "sales pipeline"],
        entity: "Contact",
        plural: "contacts",
        default_name: "Contact Book",
        status: ("stage", &["lead", "prospect", "customer", "inactive"]),
        base: &[
            ("name", Kind::Text, true),
            ("email", Kind::Text, false),
            ("phone", Kind::Text, false),
            ("company", Kind::Text, false),
        ],
        optional: &[
            ("last_contacted", Kind::Date),
            ("notes", Kind::Text),
            ("deal_value", Kind::Number),
            ("vip", Kind::Boolean),
        ],
        workflows: &[
            WorkflowTemplate {
                name: "Follow up with new leads",
                trigger: "status:lead",
                steps: &["Wait two days", "Create a follow-up reminder"],
            },
            WorkflowTemplate {
                name: "Flag stale contacts",
                trigger: "schedule:weekly",
                steps: &["Find contacts untouched for 30 days", "Mark them inactive"],
            },
        ],
    },
    DomainTemplate {
        domain: Domain::Events,
        keywords: &["event", "events", "calendar", "booking", "bookings", "appointment", "appointments", "schedule", "reservation", "reservations"],
        entity: "Event",
        plural: "events",
        default_name: "Event Planner",
        status: ("status", &["scheduled", "confirmed", "cancelled"]),
        base: &[
            ("title", Kind::Text, true),
            ("starts_at", Kind::Date, true),
            ("ends_at", Kind::Date, false),
            ("location", Kind::Text, false),
        ],
        optional: &[
            ("capacity", Kind::Number),
            ("host", Kind::Text),
            ("online", Kind::Boolean),
            ("notes", Kind::Text),
        ],
        workflows: &[
            WorkflowTemplate {
                name: "Send reminders",
                trigger: "schedule:daily",
                steps: &["Find events starting tomorrow", "Email attendees"],
            },
            WorkflowTemplate {
                name: "Confirm bookings",
                trigger: "status:scheduled",
                steps: &["Send a confirmation request", "Mark confirmed on reply"],
            },
        ],
    },
    DomainTemplate {
        domain: Domain::Generic,
        keywords: &[],
        entity: "Record",
        plural: "records",
        default_name: "My App",
        status: ("status", &["active", "archived"]),
        base: &[
            ("name", Kind::Text, true),
            ("description", Kind::Text, false),
            ("created_at", Kind::Date, false),
        ],
        optional: &[
            ("owner", Kind::Text),
            ("amount", Kind::Number),
            ("due_date", Kind::Date),
            ("flagged", Kind::Boolean),
        ],
        workflows: &[WorkflowTemplate {
            name: "Weekly digest",
            trigger: "schedule:weekly",
            steps: &["Collect new records", "Email a digest"],
        }],
    },
];

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "my", "our", "me", "i", "we", "to", "for", "of", "and", "with", "app",
    "track", "tracking", "tracker", "manage", "managing", "build", "make", "create", "want",
    "need", "simple", "small", "please", "that", "can", "help", "keep", "something", "some",
    "all", "in", "on", "it", "is", "like", "would",
];

fn template(domain: Domain) -> &'static DomainTemplate {
    TEMPLATES
        .iter()
        .find(|t| t.domain == domain)
        .unwrap_or(&TEMPLATES[TEMPLATES.len() - 1])
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Classify a free-form description by keyword hits; ties go to the
/// earlier domain.
pub fn analyze_intent(message: &str) -> IntentAnalysis {
    let tokens = words(message);
    let lowered = message.to_lowercase();

    let mut best: Option<(&DomainTemplate, usize)> = None;
    for t in TEMPLATES.iter().filter(|t| !t.keywords.is_empty()) {
        let hits = t
            .keywords
            .iter()
            .filter(|k| {
                if k.contains(' ') {
                    lowered.contains(*k)
                } else {
                    tokens.iter().any(|w| w == *k)
                }
            })
            .count();
        if hits > 0 && best.map_or(true, |(_, b)| hits > b) {
            best = Some((t, hits));
        }
    }
    let t = best.map_or_else(|| template(Domain::Generic), |(t, _)| t);

    let name_words: Vec<String> = tokens
        .iter()
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .take(4)
        .map(|w| title_case(w))
        .collect();
    let app_name = if name_words.is_empty() {
        t.default_name.to_string()
    } else {
        name_words.join(" ")
    };

    IntentAnalysis {
        domain: t.domain,
        app_name,
        entity: t.entity.to_string(),
        summary: message.trim().to_string(),
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `pickup_time` -> `Pickup time`
fn humanize(field: &str) -> String {
    title_case(&field.replace('_', " "))
}

/// `Pickup time` -> `pickup_time`
fn field_name(label: &str) -> String {
    words(label).join("_")
}

pub fn generate_questions(intent: &IntentAnalysis) -> Vec<Question> {
    let t = template(intent.domain);
    let mut workflow_options: Vec<String> =
        t.workflows.iter().map(|w| w.name.to_string()).collect();
    workflow_options.push(NO_WORKFLOW.to_string());

    vec![
        Question {
            id: FIELDS_QUESTION.to_string(),
            text: format!(
                "Besides the basics, which details should each {} keep track of?",
                t.entity.to_lowercase()
            ),
            question_type: QuestionType::Multiple,
            options: t.optional.iter().map(|(name, _)| humanize(name)).collect(),
            answered: false,
        },
        Question {
            id: VIEWS_QUESTION.to_string(),
            text: format!("How would you like to browse your {}?", t.plural),
            question_type: QuestionType::Multiple,
            options: VIEW_OPTIONS.iter().map(|k| k.label().to_string()).collect(),
            answered: false,
        },
        Question {
            id: WORKFLOW_QUESTION.to_string(),
            text: "Should anything happen automatically?".to_string(),
            question_type: QuestionType::Single,
            options: workflow_options,
            answered: false,
        },
        Question {
            id: AUDIENCE_QUESTION.to_string(),
            text: "Who will be using this app?".to_string(),
            question_type: QuestionType::Single,
            options: AUDIENCE_OPTIONS.iter().map(ToString::to_string).collect(),
            answered: false,
        },
    ]
}

/// Readiness earned by answering a question
pub fn answer_delta(question_id: &str, answer: &Answer) -> ReadinessDelta {
    let picked = u8::try_from(answer.values().len()).unwrap_or(u8::MAX);
    match question_id {
        FIELDS_QUESTION => ReadinessDelta::schema(5 + picked.min(5)),
        VIEWS_QUESTION => ReadinessDelta::ui(5 + picked.min(5)),
        WORKFLOW_QUESTION => ReadinessDelta::workflow(10),
        AUDIENCE_QUESTION => ReadinessDelta::ui(5),
        _ => ReadinessDelta::default(),
    }
}

/// Readiness hinted at by a free-form chat message
pub fn infer_readiness_delta(message: &str) -> ReadinessDelta {
    const SCHEMA: &[&str] = &["field", "fields", "column", "columns", "track", "store", "record", "data"];
    const UI: &[&str] = &["view", "views", "page", "screen", "table", "dashboard", "layout", "color", "theme", "calendar", "board"];
    const WORKFLOW: &[&str] = &["when", "notify", "email", "automatic", "automatically", "workflow", "remind", "reminder"];

    let tokens = words(message);
    let hit = |list: &[&str]| -> u8 {
        if tokens.iter().any(|w| list.contains(&w.as_str())) {
            5
        } else {
            0
        }
    };
    ReadinessDelta::new(hit(SCHEMA), hit(UI), hit(WORKFLOW))
}

fn view_kind(label: &str) -> Option<ViewKind> {
    VIEW_OPTIONS
        .iter()
        .chain(&[ViewKind::Form, ViewKind::Detail])
        .copied()
        .find(|k| k.label().eq_ignore_ascii_case(label.trim()) || format!("{k:?}").eq_ignore_ascii_case(label.trim()))
}

/// Deterministic spec from intent and answers
pub fn synthesize_spec(intent: &IntentAnalysis, answers: &BTreeMap<String, Answer>) -> AppSpec {
    let t = template(intent.domain);

    let mut fields: Vec<FieldDefinition> = t
        .base
        .iter()
        .map(|(name, kind, required)| FieldDefinition::new(*name, kind.field_type(), *required))
        .collect();
    fields.insert(
        fields.len().min(3),
        FieldDefinition::new(t.status.0, FieldType::enumeration(t.status.1.iter().copied()), true),
    );

    if let Some(answer) = answers.get(FIELDS_QUESTION) {
        for label in answer.values() {
            let name = field_name(label);
            if name.is_empty() || fields.iter().any(|f| f.name == name) {
                continue;
            }
            let kind = t
                .optional
                .iter()
                .find(|(opt, _)| *opt == name)
                .map_or(Kind::Text, |(_, kind)| *kind);
            fields.push(FieldDefinition::new(name, kind.field_type(), false));
        }
    }

    let entity = Entity {
        name: t.entity.to_string(),
        fields,
    };

    let mut kinds: Vec<ViewKind> = answers
        .get(VIEWS_QUESTION)
        .map(|a| a.values().into_iter().filter_map(view_kind).collect())
        .unwrap_or_default();
    if kinds.is_empty() {
        kinds.push(ViewKind::Table);
    }
    kinds.dedup();
    if !kinds.contains(&ViewKind::Form) {
        kinds.push(ViewKind::Form);
    }
    let views = kinds
        .into_iter()
        .map(|kind| View {
            name: match kind {
                ViewKind::Form => format!("New {}", t.entity.to_lowercase()),
                other => format!("{} {}", title_case(t.plural), other.label().to_lowercase()),
            },
            kind,
            entity: t.entity.to_string(),
        })
        .collect();

    let navigation = match answers.get(AUDIENCE_QUESTION).and_then(Answer::first) {
        Some("Customers") => Navigation::Topbar,
        _ => Navigation::Sidebar,
    };

    let workflows = answers
        .get(WORKFLOW_QUESTION)
        .map(|a| {
            a.values()
                .into_iter()
                .filter_map(|choice| t.workflows.iter().find(|w| w.name == choice))
                .map(|w| Workflow {
                    name: w.name.to_string(),
                    trigger: w.trigger.to_string(),
                    steps: w.steps.iter().map(ToString::to_string).collect(),
                })
                .collect()
        })
        .unwrap_or_default();

    AppSpec {
        name: intent.app_name.clone(),
        description: intent.summary.clone(),
        entities: vec![entity],
        views,
        layout: Layout {
            navigation,
            theme: "light".to_string(),
        },
        workflows,
    }
}

/// Ordered build steps: types, data layer, one per view, one per workflow
pub fn synthesize_plan(spec: &AppSpec) -> Plan {
    let mut steps = vec![
        PlanStep {
            id: "types".to_string(),
            title: "Define data types".to_string(),
            component: "types".to_string(),
        },
        PlanStep {
            id: "data".to_string(),
            title: "Set up the data store".to_string(),
            component: "page".to_string(),
        },
    ];
    steps.extend(spec.views.iter().enumerate().map(|(i, view)| PlanStep {
        id: format!("view-{}", i + 1),
        title: format!("Build the {} view", view.name),
        component: "page".to_string(),
    }));
    steps.extend(spec.workflows.iter().enumerate().map(|(i, wf)| PlanStep {
        id: format!("workflow-{}", i + 1),
        title: format!("Wire up \"{}\"", wf.name),
        component: "page".to_string(),
    }));
    Plan { steps }
}

/// Three alternative designs, from lean to feature-rich
pub fn generate_proposals(spec: &AppSpec) -> Vec<DesignProposal> {
    let Some(primary) = spec.primary_entity() else {
        return Vec::new();
    };

    let with_extra = |extra: &[(&str, FieldType)]| Entity {
        name: primary.name.clone(),
        fields: extra
            .iter()
            .map(|(name, ty)| FieldDefinition::new(*name, ty.clone(), false))
            .collect(),
    };

    vec![
        DesignProposal {
            id: "minimal".to_string(),
            title: "Minimal".to_string(),
            summary: "A single clean page with a top bar; nothing extra.".to_string(),
            entities: Vec::new(),
            layout: Some(Layout {
                navigation: Navigation::Topbar,
                theme: "light".to_string(),
            }),
            workflows: Vec::new(),
        },
        DesignProposal {
            id: "standard".to_string(),
            title: "Standard".to_string(),
            summary: "Sidebar navigation and a notes field on every record.".to_string(),
            entities: vec![with_extra(&[("notes", FieldType::Text)])],
            layout: Some(Layout::default()),
            workflows: Vec::new(),
        },
        DesignProposal {
            id: "rich".to_string(),
            title: "Rich".to_string(),
            summary: "Dark sidebar layout, attachments, and a weekly summary email.".to_string(),
            entities: vec![with_extra(&[
                ("notes", FieldType::Text),
                ("attachment_url", FieldType::Text),
                ("archived", FieldType::Boolean),
            ])],
            layout: Some(Layout {
                navigation: Navigation::Sidebar,
                theme: "dark".to_string(),
            }),
            workflows: vec![Workflow {
                name: "Weekly summary".to_string(),
                trigger: "schedule:weekly".to_string(),
                steps: vec![
                    format!("Collect this week's {} changes", primary.name.to_lowercase()),
                    "Email the summary".to_string(),
                ],
            }],
        },
    ]
}
