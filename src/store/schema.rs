pub const SCHEMA: &str = r#"
-- Human operators driving the control plane
CREATE TABLE IF NOT EXISTS operators (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Session tokens are bearer credentials for operators
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    token_hash TEXT NOT NULL,          -- argon2id hash with embedded salt
    token_lookup TEXT NOT NULL,        -- lookup segment of the token
    operator_id TEXT NOT NULL REFERENCES operators(id) ON DELETE CASCADE,
    created_at TEXT DEFAULT (datetime('now')),
    expires_at TEXT,                   -- NULL = never
    last_used_at TEXT
);

-- Application identities used by the signed registration protocol
CREATE TABLE IF NOT EXISTS applications (
    key TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    secret TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Nonces seen inside the freshness window
CREATE TABLE IF NOT EXISTS seen_nonces (
    app_key TEXT NOT NULL,
    nonce TEXT NOT NULL,
    expires_at INTEGER NOT NULL,       -- epoch milliseconds
    PRIMARY KEY (app_key, nonce)
);

-- Permission catalog; codes are prefixed with their application key
CREATE TABLE IF NOT EXISTS permissions (
    code TEXT PRIMARY KEY,
    application_key TEXT NOT NULL,
    name TEXT NOT NULL,
    is_enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Published permission versions, never updated
CREATE TABLE IF NOT EXISTS permission_versions (
    id TEXT PRIMARY KEY,
    application_key TEXT NOT NULL,
    number INTEGER NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE(application_key, number)
);

-- Roles group permission codes of one application
CREATE TABLE IF NOT EXISTS roles (
    id TEXT PRIMARY KEY,
    application_key TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE(application_key, name)
);

CREATE TABLE IF NOT EXISTS role_permissions (
    role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    permission_code TEXT NOT NULL REFERENCES permissions(code) ON DELETE CASCADE,
    created_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (role_id, permission_code)
);

-- Users are opaque ids issued by the host's identity provider
CREATE TABLE IF NOT EXISTS user_roles (
    user_id TEXT NOT NULL,
    role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    created_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (user_id, role_id)
);

-- One row per application describing its physical schema
CREATE TABLE IF NOT EXISTS schema_registry (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    app_id TEXT NOT NULL UNIQUE,
    schema_name TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'creating',
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Append-only audit of attempted migration files
CREATE TABLE IF NOT EXISTS migration_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    app_id TEXT NOT NULL,
    filename TEXT NOT NULL,
    executed_at TEXT DEFAULT (datetime('now')),
    success INTEGER NOT NULL DEFAULT 1,
    error TEXT,
    UNIQUE(app_id, filename)
);

-- Per-application lease held for the duration of one schema sync
CREATE TABLE IF NOT EXISTS migration_leases (
    app_id TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at INTEGER NOT NULL        -- epoch milliseconds
);

-- Logical schema documents and their versions
CREATE TABLE IF NOT EXISTS logical_schemas (
    id TEXT PRIMARY KEY,
    application_key TEXT NOT NULL,
    name TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS schema_versions (
    id TEXT PRIMARY KEY,
    schema_id TEXT NOT NULL REFERENCES logical_schemas(id) ON DELETE CASCADE,
    number INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'draft',
    definition TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE(schema_id, number)
);

-- Application directory maintained by the admin service
CREATE TABLE IF NOT EXISTS apps (
    app_id TEXT PRIMARY KEY,
    app_name TEXT NOT NULL,
    description TEXT,
    latest_version TEXT,
    url TEXT,
    menus TEXT NOT NULL DEFAULT 'null',
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Create indexes
CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_lookup ON sessions(token_lookup);
CREATE INDEX IF NOT EXISTS idx_sessions_operator ON sessions(operator_id);
CREATE INDEX IF NOT EXISTS idx_seen_nonces_expiry ON seen_nonces(expires_at);
CREATE INDEX IF NOT EXISTS idx_permissions_application ON permissions(application_key);
CREATE INDEX IF NOT EXISTS idx_permission_versions_application ON permission_versions(application_key);
CREATE INDEX IF NOT EXISTS idx_roles_application ON roles(application_key);
CREATE INDEX IF NOT EXISTS idx_role_permissions_code ON role_permissions(permission_code);
CREATE INDEX IF NOT EXISTS idx_user_roles_role ON user_roles(role_id);
CREATE INDEX IF NOT EXISTS idx_migration_history_app ON migration_history(app_id);
CREATE INDEX IF NOT EXISTS idx_logical_schemas_application ON logical_schemas(application_key);
CREATE INDEX IF NOT EXISTS idx_schema_versions_schema ON schema_versions(schema_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_schema_versions_published
    ON schema_versions(schema_id) WHERE status = 'published';
"#;
