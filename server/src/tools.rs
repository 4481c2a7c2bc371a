//! The agent's toolset: student-record CRUD against the store plus campus
//! FAQ retrieval. Exposes OpenAI-style function definitions and a dispatch
//! entry point keyed by tool name.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::store::Store;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

pub struct Toolset {
    store: Store,
    faq: Vec<FaqEntry>,
}

impl Toolset {
    pub fn new(store: Store, faq: Vec<FaqEntry>) -> Self {
        Self { store, faq }
    }

    /// FAQ corpus from `{data_dir}/faq.json` when present, seeded defaults
    /// otherwise.
    pub fn with_default_faq(store: Store, data_dir: &str) -> Self {
        let faq = load_faq(data_dir).unwrap_or_else(default_faq);
        Self::new(store, faq)
    }

    pub fn definitions(&self) -> Vec<Value> {
        vec![
            function_def(
                "read_students",
                "List all student records.",
                json!({"type": "object", "properties": {}}),
            ),
            function_def(
                "read_student_by_id",
                "Fetch a single student record by its id.",
                json!({"type": "object", "properties": {"id": {"type": "string"}}, "required": ["id"]}),
            ),
            function_def(
                "add_student",
                "Create a new student record.",
                json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "email": {"type": "string"},
                        "department": {"type": "string"}
                    },
                    "required": ["name"]
                }),
            ),
            function_def(
                "update_student",
                "Update fields of an existing student record.",
                json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "name": {"type": "string"},
                        "email": {"type": "string"},
                        "department": {"type": "string"}
                    },
                    "required": ["id"]
                }),
            ),
            function_def(
                "delete_student",
                "Delete a student record by its id.",
                json!({"type": "object", "properties": {"id": {"type": "string"}}, "required": ["id"]}),
            ),
            function_def(
                "campus_faq",
                "Answer general campus questions from the FAQ corpus.",
                json!({"type": "object", "properties": {"query": {"type": "string"}}, "required": ["query"]}),
            ),
        ]
    }

    pub fn dispatch(&self, name: &str, args: &Value) -> Result<Value> {
        match name {
            "read_students" => {
                let students = self.store.list_students()?;
                Ok(json!({"count": students.len(), "students": students}))
            }
            "read_student_by_id" => {
                let id = str_arg(args, "id")?;
                match self.store.get_student(id)? {
                    Some(s) => Ok(json!(s)),
                    None => Ok(json!({"error": "student not found", "id": id})),
                }
            }
            "add_student" => {
                let name = str_arg(args, "name")?;
                let student = self.store.insert_student(name, opt_arg(args, "email"), opt_arg(args, "department"))?;
                Ok(json!({"created": true, "student": student}))
            }
            "update_student" => {
                let id = str_arg(args, "id")?;
                match self.store.update_student(
                    id,
                    opt_arg(args, "name"),
                    opt_arg(args, "email"),
                    opt_arg(args, "department"),
                )? {
                    Some(s) => Ok(json!({"updated": true, "student": s})),
                    None => Ok(json!({"updated": false, "error": "student not found", "id": id})),
                }
            }
            "delete_student" => {
                let id = str_arg(args, "id")?;
                Ok(json!({"deleted": self.store.delete_student(id)?, "id": id}))
            }
            "campus_faq" => {
                let query = str_arg(args, "query")?;
                Ok(self.faq_answer(query))
            }
            _ => Err(anyhow!("unknown tool: {}", name)),
        }
    }

    // Keyword-overlap retrieval: best-scoring entry over question + answer
    // text, terms shorter than three characters ignored.
    fn faq_answer(&self, query: &str) -> Value {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|t| t.len() > 2)
            .collect();
        let mut best: Option<(usize, &FaqEntry)> = None;
        for entry in &self.faq {
            let hay = format!("{} {}", entry.question, entry.answer).to_lowercase();
            let score = terms.iter().filter(|t| hay.contains(t.as_str())).count();
            if score > 0 && best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((score, entry));
            }
        }
        match best {
            Some((_, entry)) => {
                json!({"query": query, "question": entry.question, "answer": entry.answer})
            }
            None => json!({"query": query, "answer": Value::Null, "note": "No matching FAQ entry"}),
        }
    }
}

fn function_def(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {"name": name, "description": description, "parameters": parameters}
    })
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("{} argument required", key))
}

fn opt_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
}

fn load_faq(data_dir: &str) -> Option<Vec<FaqEntry>> {
    let path = std::path::Path::new(data_dir).join("faq.json");
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn default_faq() -> Vec<FaqEntry> {
    let entries = [
        ("What are the library opening hours?", "The campus library is open 8am to 10pm on weekdays and 10am to 6pm on weekends."),
        ("Where is the admissions office?", "The admissions office is in the Administration Block, ground floor, room A-104."),
        ("When does the semester start?", "The fall semester starts in the first week of September and the spring semester in the first week of February."),
        ("What is the fee payment deadline?", "Tuition fees are due within two weeks of the semester start date. Late payments incur a surcharge."),
        ("How do I apply for a hostel room?", "Hostel applications are submitted through the student portal under Housing; allocations are first come, first served."),
    ];
    entries
        .iter()
        .map(|(q, a)| FaqEntry { question: q.to_string(), answer: a.to_string() })
        .collect()
}
