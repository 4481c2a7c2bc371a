//! sled-backed document store: three flat collections (`chats`, `profiles`,
//! `students`) holding JSON values, plus a `threads` marker index with one
//! row per created thread. Constructed once at startup and handed to the
//! components that need it; tests open it over a temp directory.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::profile::ProfileUpdate;

const CHATS: &str = "chats";
const PROFILES: &str = "profiles";
const STUDENTS: &str = "students";
const THREADS: &str = "threads";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChatMessage {
    pub id: String,
    pub thread_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Profile {
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profession: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Student {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Store {
    db: sled::Db,
}

impl Store {
    pub fn open(data_dir: &str) -> Result<Self> {
        let path = std::path::Path::new(data_dir).join("kv");
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn chats(&self) -> Result<sled::Tree> {
        Ok(self.db.open_tree(CHATS)?)
    }

    fn profiles(&self) -> Result<sled::Tree> {
        Ok(self.db.open_tree(PROFILES)?)
    }

    fn students(&self) -> Result<sled::Tree> {
        Ok(self.db.open_tree(STUDENTS)?)
    }

    fn threads(&self) -> Result<sled::Tree> {
        Ok(self.db.open_tree(THREADS)?)
    }

    // Zero-padded nanos keep prefix scans chronological within a thread; the
    // uuid suffix keeps concurrent same-instant rows distinct. No per-thread
    // lock: concurrent turns on one thread may interleave their rows.
    fn chat_key(msg: &ChatMessage) -> String {
        let nanos = msg.timestamp.timestamp_nanos_opt().unwrap_or(i64::MAX);
        format!("{}:{:020}:{}", msg.thread_id, nanos, msg.id)
    }

    pub fn append_message(&self, thread_id: &str, role: Role, content: &str) -> Result<ChatMessage> {
        let msg = ChatMessage {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        self.chats()?.insert(Self::chat_key(&msg).as_bytes(), serde_json::to_vec(&msg)?)?;
        Ok(msg)
    }

    /// Fresh thread id plus its `system` marker message. The marker is also
    /// indexed in the `threads` tree so listing and latest-thread resolution
    /// scan one row per thread.
    pub fn create_thread(&self, marker: &str) -> Result<(String, ChatMessage)> {
        let thread_id = Uuid::new_v4().to_string();
        let msg = self.append_message(&thread_id, Role::System, marker)?;
        self.threads()?.insert(thread_id.as_bytes(), serde_json::to_vec(&msg)?)?;
        Ok((thread_id, msg))
    }

    pub fn full_history(&self, thread_id: &str) -> Result<Vec<ChatMessage>> {
        let chats = self.chats()?;
        let prefix = format!("{}:", thread_id);
        let mut out: Vec<ChatMessage> = Vec::new();
        for kv in chats.scan_prefix(prefix.as_bytes()) {
            let (_, v) = kv?;
            let msg: ChatMessage = serde_json::from_slice(&v)?;
            // Client-supplied ids may contain the key separator, so the
            // prefix also matches ids that extend this one past a ':'.
            // Keep only rows the thread actually owns.
            if msg.thread_id == thread_id {
                out.push(msg);
            }
        }
        Ok(out)
    }

    /// Last `limit` messages in chronological order, for bounded agent context.
    pub fn recent_history(&self, thread_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let mut all = self.full_history(thread_id)?;
        if all.len() > limit {
            all.drain(..all.len() - limit);
        }
        Ok(all)
    }

    /// Every `system` marker message, newest first. One marker per created
    /// thread; threads lazily born via an explicit chat id carry no marker.
    pub fn system_markers(&self) -> Result<Vec<ChatMessage>> {
        let mut out: Vec<ChatMessage> = Vec::new();
        for kv in self.threads()?.iter() {
            let (_, v) = kv?;
            out.push(serde_json::from_slice(&v)?);
        }
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }

    pub fn latest_thread(&self) -> Result<Option<String>> {
        Ok(self.system_markers()?.into_iter().next().map(|m| m.thread_id))
    }

    pub fn first_user_message(&self, thread_id: &str) -> Result<Option<ChatMessage>> {
        Ok(self.full_history(thread_id)?.into_iter().find(|m| m.role == Role::User))
    }

    /// Cascade delete of every chat row, the profile row, and the marker
    /// index entry. Idempotent. Scoped to rows the thread owns; ids that
    /// merely extend this one past a ':' are untouched.
    pub fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let chats = self.chats()?;
        let prefix = format!("{}:", thread_id);
        let mut keys = Vec::new();
        for kv in chats.scan_prefix(prefix.as_bytes()) {
            let (k, v) = kv?;
            let msg: ChatMessage = serde_json::from_slice(&v)?;
            if msg.thread_id == thread_id {
                keys.push(k);
            }
        }
        for k in keys {
            chats.remove(k)?;
        }
        self.profiles()?.remove(thread_id.as_bytes())?;
        self.threads()?.remove(thread_id.as_bytes())?;
        Ok(())
    }

    pub fn get_profile(&self, thread_id: &str) -> Result<Option<Profile>> {
        match self.profiles()?.get(thread_id.as_bytes())? {
            Some(v) => Ok(Some(serde_json::from_slice(&v)?)),
            None => Ok(None),
        }
    }

    /// Merges the matched fields into the profile row. Fields are additive:
    /// an absent field in `update` leaves the stored value untouched.
    pub fn upsert_profile(&self, thread_id: &str, update: &ProfileUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        let mut profile = self.get_profile(thread_id)?.unwrap_or(Profile {
            thread_id: thread_id.to_string(),
            name: None,
            profession: None,
        });
        if let Some(name) = &update.name {
            profile.name = Some(name.clone());
        }
        if let Some(profession) = &update.profession {
            profile.profession = Some(profession.clone());
        }
        self.profiles()?.insert(thread_id.as_bytes(), serde_json::to_vec(&profile)?)?;
        Ok(())
    }

    pub fn insert_student(&self, name: &str, email: Option<String>, department: Option<String>) -> Result<Student> {
        let now = Utc::now();
        let student = Student {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            email,
            department,
            created_at: now,
            last_active: now,
        };
        self.students()?.insert(student.id.as_bytes(), serde_json::to_vec(&student)?)?;
        Ok(student)
    }

    pub fn get_student(&self, id: &str) -> Result<Option<Student>> {
        match self.students()?.get(id.as_bytes())? {
            Some(v) => Ok(Some(serde_json::from_slice(&v)?)),
            None => Ok(None),
        }
    }

    pub fn list_students(&self) -> Result<Vec<Student>> {
        let mut out = Vec::new();
        for kv in self.students()?.iter() {
            let (_, v) = kv?;
            out.push(serde_json::from_slice(&v)?);
        }
        Ok(out)
    }

    pub fn update_student(
        &self,
        id: &str,
        name: Option<String>,
        email: Option<String>,
        department: Option<String>,
    ) -> Result<Option<Student>> {
        let students = self.students()?;
        let raw = match students.get(id.as_bytes())? {
            Some(v) => v,
            None => return Ok(None),
        };
        let mut student: Student = serde_json::from_slice(&raw)?;
        if let Some(n) = name {
            student.name = n;
        }
        if let Some(e) = email {
            student.email = Some(e);
        }
        if let Some(d) = department {
            student.department = Some(d);
        }
        student.last_active = Utc::now();
        students.insert(id.as_bytes(), serde_json::to_vec(&student)?)?;
        Ok(Some(student))
    }

    pub fn delete_student(&self, id: &str) -> Result<bool> {
        Ok(self.students()?.remove(id.as_bytes())?.is_some())
    }

    pub fn count_students(&self) -> Result<usize> {
        Ok(self.students()?.len())
    }

    /// Raw grouped counts keyed by the stored department value; canonical
    /// merging happens in the analytics layer.
    pub fn department_counts(&self) -> Result<HashMap<Option<String>, u64>> {
        let mut counts = HashMap::new();
        for student in self.list_students()? {
            *counts.entry(student.department).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub fn recent_students(&self, limit: usize) -> Result<Vec<Student>> {
        let mut students = self.list_students()?;
        students.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        students.truncate(limit);
        Ok(students)
    }

    /// `last_active` counts bucketed by UTC calendar day (`%Y-%m-%d`) since
    /// the cutoff.
    pub fn daily_active_counts(&self, since: DateTime<Utc>) -> Result<HashMap<String, u64>> {
        let mut counts = HashMap::new();
        for student in self.list_students()? {
            if student.last_active >= since {
                let day = student.last_active.format("%Y-%m-%d").to_string();
                *counts.entry(day).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}
