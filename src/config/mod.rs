use crate::utils::error::{Result, StoreError};
use crate::utils::validation::{
    validate_bucket_name, validate_non_empty_string, validate_path, validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Local,
    Cloud,
}

/// The closed set of backend families. Adding a backend means adding a
/// variant here and getting exhaustiveness errors everywhere it matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Postgrest,
    Couch,
    Supabase,
    Firebase,
    S3,
}

impl BackendKind {
    pub fn is_cloud(&self) -> bool {
        !matches!(self, Self::Local)
    }

    pub fn supports_data(&self) -> bool {
        !matches!(self, Self::S3)
    }

    pub fn supports_pictures(&self) -> bool {
        !matches!(self, Self::Postgrest | Self::Couch)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Postgrest => "postgrest",
            Self::Couch => "couch",
            Self::Supabase => "supabase",
            Self::Firebase => "firebase",
            Self::S3 => "s3",
        };
        write!(f, "{}", name)
    }
}

fn default_db_prefix() -> String {
    "pantry_".to_string()
}

fn default_token_role() -> String {
    "web_user".to_string()
}

fn default_settings_path() -> String {
    "./pantry-settings.json".to_string()
}

/// Connection settings for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Local {
        base_dir: String,
    },
    Postgrest {
        base_url: String,
        jwt_secret: String,
        #[serde(default = "default_token_role")]
        token_role: String,
    },
    Couch {
        base_url: String,
        username: String,
        password: String,
        #[serde(default = "default_db_prefix")]
        db_prefix: String,
    },
    Supabase {
        base_url: String,
        api_key: String,
        bucket: String,
    },
    Firebase {
        database_url: String,
        storage_url: String,
        bucket: String,
        auth_token: String,
    },
    S3 {
        bucket: String,
        region: String,
        endpoint: Option<String>,
    },
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Local { .. } => BackendKind::Local,
            Self::Postgrest { .. } => BackendKind::Postgrest,
            Self::Couch { .. } => BackendKind::Couch,
            Self::Supabase { .. } => BackendKind::Supabase,
            Self::Firebase { .. } => BackendKind::Firebase,
            Self::S3 { .. } => BackendKind::S3,
        }
    }

    fn validate_settings(&self, side: &str) -> Result<()> {
        match self {
            Self::Local { base_dir } => validate_path(&format!("{}.base_dir", side), base_dir),
            Self::Postgrest {
                base_url,
                jwt_secret,
                token_role,
            } => {
                validate_url(&format!("{}.base_url", side), base_url)?;
                validate_non_empty_string(&format!("{}.jwt_secret", side), jwt_secret)?;
                validate_non_empty_string(&format!("{}.token_role", side), token_role)
            }
            Self::Couch {
                base_url,
                username,
                password,
                db_prefix,
            } => {
                validate_url(&format!("{}.base_url", side), base_url)?;
                validate_non_empty_string(&format!("{}.username", side), username)?;
                validate_non_empty_string(&format!("{}.password", side), password)?;
                validate_non_empty_string(&format!("{}.db_prefix", side), db_prefix)
            }
            Self::Supabase {
                base_url,
                api_key,
                bucket,
            } => {
                validate_url(&format!("{}.base_url", side), base_url)?;
                validate_non_empty_string(&format!("{}.api_key", side), api_key)?;
                validate_bucket_name(&format!("{}.bucket", side), bucket)
            }
            Self::Firebase {
                database_url,
                storage_url,
                bucket,
                auth_token,
            } => {
                validate_url(&format!("{}.database_url", side), database_url)?;
                validate_url(&format!("{}.storage_url", side), storage_url)?;
                validate_bucket_name(&format!("{}.bucket", side), bucket)?;
                validate_non_empty_string(&format!("{}.auth_token", side), auth_token)
            }
            Self::S3 {
                bucket,
                region,
                endpoint,
            } => {
                validate_bucket_name(&format!("{}.bucket", side), bucket)?;
                validate_non_empty_string(&format!("{}.region", side), region)?;
                if let Some(endpoint) = endpoint {
                    validate_url(&format!("{}.endpoint", side), endpoint)?;
                }
                Ok(())
            }
        }
    }
}

/// The active configuration a `StorageContext` is built from. The data and
/// picture backends may legitimately differ in cloud mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub mode: Mode,
    pub data: BackendConfig,
    pub pictures: BackendConfig,
    /// Where per-connection state (derived credentials) is persisted.
    #[serde(default = "default_settings_path")]
    pub settings_path: String,
}

impl StorageConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(StoreError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| StoreError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR_NAME}` placeholders with environment values.
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").unwrap();

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }
}

impl Validate for StorageConfig {
    fn validate(&self) -> Result<()> {
        let data_kind = self.data.kind();
        let picture_kind = self.pictures.kind();

        match self.mode {
            Mode::Local => {
                if data_kind != BackendKind::Local || picture_kind != BackendKind::Local {
                    return Err(StoreError::config(
                        "local mode requires the embedded local backend on both sides",
                    ));
                }
            }
            Mode::Cloud => {
                if !data_kind.is_cloud() || !picture_kind.is_cloud() {
                    return Err(StoreError::config(
                        "cloud mode requires cloud-capable backends on both sides",
                    ));
                }
            }
        }

        if !data_kind.supports_data() {
            return Err(StoreError::config(format!(
                "backend '{}' cannot store entity data",
                data_kind
            )));
        }
        if !picture_kind.supports_pictures() {
            return Err(StoreError::config(format!(
                "backend '{}' cannot store pictures",
                picture_kind
            )));
        }

        self.data.validate_settings("data")?;
        self.pictures.validate_settings("pictures")?;
        validate_path("settings_path", &self.settings_path)
    }
}
