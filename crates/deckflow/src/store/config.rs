use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub db_type: DatabaseType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Sqlite,
    Memory,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: DatabaseType::Sqlite,
            sqlite_path: Some(PathBuf::from("data/deckflow.db")),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self.db_type {
            DatabaseType::Sqlite => {
                if self.sqlite_path.is_none() {
                    return Err("SQLite path is required for SQLite database type".to_string());
                }
            }
            DatabaseType::Memory => {}
        }
        if self.max_connections == 0 {
            return Err("Database max_connections must be at least 1".to_string());
        }
        Ok(())
    }
}
