//! Declarative schema definition driving table creation (spec.md §4.B, §3).
//!
//! A single list of [`Migration`]s is the storage contract: table creation,
//! `CHECK` constraints on enum columns, and the indexes spec.md §3 names.
//! Grounded in the teacher's `adapters/sqlite/migrations.rs` `Migration`
//! struct and `Migrator::run_embedded_migrations` idiom.

/// One forward-only schema migration.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

/// The full, ordered migration set for a fresh database.
pub fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "agents table",
            sql: r#"
CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    agent_type TEXT NOT NULL CHECK (agent_type IN ('manager','implementation','ad_hoc')),
    status TEXT NOT NULL CHECK (status IN ('spawning','active','waiting','idle','terminated')),
    current_task_id TEXT,
    domain TEXT CHECK (domain IS NULL OR domain IN
        ('foundation','cli','communication','automation','parallel','qa','monitoring','session','config','docs','general')),
    spawned_at TEXT NOT NULL,
    last_activity_at TEXT NOT NULL,
    process_id INTEGER,
    worktree_path TEXT,
    metadata_json TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status);
CREATE INDEX IF NOT EXISTS idx_agents_type ON agents(agent_type);
CREATE INDEX IF NOT EXISTS idx_agents_current_task ON agents(current_task_id);
CREATE INDEX IF NOT EXISTS idx_agents_domain ON agents(domain);
"#,
        },
        Migration {
            version: 2,
            description: "tasks table",
            sql: r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    phase_id TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending','assigned','in_progress','blocked','completed','failed')),
    assigned_agent TEXT REFERENCES agents(id),
    required_domain TEXT CHECK (required_domain IS NULL OR required_domain IN
        ('foundation','cli','communication','automation','parallel','qa','monitoring','session','config','docs','general')),
    priority INTEGER NOT NULL DEFAULT 0,
    start_time TEXT,
    completion_time TEXT,
    execution_type TEXT NOT NULL DEFAULT 'standard',
    memory_log_path TEXT,
    metadata_json TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_tasks_phase_status ON tasks(phase_id, status);
CREATE INDEX IF NOT EXISTS idx_tasks_assigned_agent ON tasks(assigned_agent);
CREATE INDEX IF NOT EXISTS idx_tasks_required_domain ON tasks(required_domain);
CREATE INDEX IF NOT EXISTS idx_tasks_priority_status ON tasks(priority, status);
"#,
        },
        Migration {
            version: 3,
            description: "task dependencies join table",
            sql: r#"
CREATE TABLE IF NOT EXISTS task_dependencies (
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    depends_on_task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    dependency_type TEXT NOT NULL CHECK (dependency_type IN ('required','optional')),
    description TEXT,
    PRIMARY KEY (task_id, depends_on_task_id)
);
"#,
        },
        Migration {
            version: 4,
            description: "sessions and checkpoints",
            sql: r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('initializing','running','paused','completed','failed')),
    start_time TEXT NOT NULL,
    pause_time TEXT,
    end_time TEXT,
    metadata_json TEXT NOT NULL DEFAULT '{}'
);
CREATE TABLE IF NOT EXISTS session_checkpoints (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    timestamp TEXT NOT NULL,
    description TEXT NOT NULL,
    active_agents_json TEXT NOT NULL DEFAULT '[]',
    completed_tasks_json TEXT NOT NULL DEFAULT '[]',
    in_progress_tasks_json TEXT NOT NULL DEFAULT '[]',
    metadata_json TEXT
);
"#,
        },
        Migration {
            version: 5,
            description: "state transition audit log",
            sql: r#"
CREATE TABLE IF NOT EXISTS state_transitions (
    id TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL CHECK (entity_type IN ('agent','task','session')),
    entity_id TEXT NOT NULL,
    from_state TEXT NOT NULL,
    to_state TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    trigger TEXT NOT NULL CHECK (trigger IN ('automatic','user_action','dependency','error','timeout','manual','recovery')),
    metadata_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_transitions_entity ON state_transitions(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_transitions_timestamp ON state_transitions(timestamp);
"#,
        },
    ]
}
