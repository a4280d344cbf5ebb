// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment templates.
//!
//! One template per environment type: what image to launch, which port it
//! listens on, and the post-launch recipe that points the application at its
//! externally visible base URL. The images ship with defaults for a fixed
//! development host, so most of them are unusable until the recipe has run.
//!
//! Recipes are typed steps rendered to shell commands at apply time.

use std::time::Duration;

use crate::error::{Error, Result};

const MAGENTO_CLI: &str = "php /var/www/magento2/bin/magento";

/// Host baked into the shipped images. While it still appears in redirects,
/// the base-URL rewrite has not taken effect.
pub const PLACEHOLDER_HOST: &str = "metis.lti.cs.cmu.edu";

/// Memory limit applied to every environment workload (8 GiB).
pub const WORKLOAD_MEMORY_LIMIT_BYTES: i64 = 8 * 1024 * 1024 * 1024;

/// A value substituted into a configuration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepValue {
    /// Fixed value.
    Literal(String),
    /// The instance base URL, as given.
    BaseUrl,
    /// The instance base URL with exactly one trailing slash.
    BaseUrlWithSlash,
}

impl StepValue {
    /// Literal value helper.
    pub fn literal(value: impl Into<String>) -> Self {
        StepValue::Literal(value.into())
    }

    /// Resolve against an instance base URL.
    pub fn resolve(&self, base_url: &str) -> String {
        match self {
            StepValue::Literal(v) => v.clone(),
            StepValue::BaseUrl => base_url.to_string(),
            StepValue::BaseUrlWithSlash => format!("{}/", base_url.trim_end_matches('/')),
        }
    }
}

/// MySQL client credentials used inside a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlCredentials {
    /// Database user.
    pub user: String,
    /// Database password.
    pub password: String,
    /// Database name.
    pub database: String,
}

/// One post-launch configuration step.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigStep {
    /// `bin/magento config:set <path> <value>`.
    MagentoConfigSet {
        /// Configuration path, e.g. `web/secure/base_url`.
        path: String,
        /// Value to store.
        value: StepValue,
    },
    /// Upsert rows of Magento's `core_config_data` through the MySQL client.
    MagentoConfigUpsert {
        /// Client credentials.
        db: MysqlCredentials,
        /// `(path, value)` pairs, applied in order.
        entries: Vec<(String, StepValue)>,
    },
    /// Rewrite the `external_url` line of a GitLab Omnibus config file.
    GitlabExternalUrl {
        /// Path of `gitlab.rb` inside the workload.
        config_file: String,
    },
    /// Arbitrary shell command.
    Shell {
        /// Command line passed to `bash -lc`.
        command: String,
        /// If true, a non-zero exit does not fail the attempt.
        tolerate_failure: bool,
    },
    /// Wait inside the recipe before the next step.
    Pause(Duration),
}

impl ConfigStep {
    /// Shell step that must succeed.
    pub fn shell(command: impl Into<String>) -> Self {
        ConfigStep::Shell {
            command: command.into(),
            tolerate_failure: false,
        }
    }

    /// Shell step whose failure is ignored.
    pub fn shell_tolerant(command: impl Into<String>) -> Self {
        ConfigStep::Shell {
            command: command.into(),
            tolerate_failure: true,
        }
    }

    /// Magento `config:set` helper.
    pub fn magento_set(path: impl Into<String>, value: StepValue) -> Self {
        ConfigStep::MagentoConfigSet {
            path: path.into(),
            value,
        }
    }

    /// Whether a non-zero exit of this step is acceptable.
    pub fn tolerates_failure(&self) -> bool {
        matches!(
            self,
            ConfigStep::Shell {
                tolerate_failure: true,
                ..
            }
        )
    }

    /// Render the shell command for this step. `None` for steps that do not
    /// execute anything inside the workload.
    pub fn render(&self, base_url: &str) -> Option<String> {
        match self {
            ConfigStep::MagentoConfigSet { path, value } => Some(format!(
                "{} config:set {} \"{}\"",
                MAGENTO_CLI,
                path,
                value.resolve(base_url)
            )),
            ConfigStep::MagentoConfigUpsert { db, entries } => {
                let mut sql = String::new();
                for (path, value) in entries {
                    let path = sql_quote(path);
                    let value = sql_quote(&value.resolve(base_url));
                    sql.push_str(&format!(
                        "INSERT INTO core_config_data (scope,scope_id,path,value) \
                         SELECT 'default',0,{path},{value} FROM DUAL \
                         WHERE NOT EXISTS (SELECT 1 FROM core_config_data WHERE path={path});\n\
                         UPDATE core_config_data SET value={value} WHERE path={path};\n"
                    ));
                }
                Some(format!(
                    "mysql -u {} -p{} {} -e \"\n{}\"",
                    db.user, db.password, db.database, sql
                ))
            }
            ConfigStep::GitlabExternalUrl { config_file } => Some(format!(
                "sed -i \"s|^external_url.*|external_url '{}'|\" {}",
                base_url, config_file
            )),
            ConfigStep::Shell { command, .. } => Some(command.clone()),
            ConfigStep::Pause(_) => None,
        }
    }
}

/// Quote a string as a SQL literal.
fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Static definition of one environment type.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentTemplate {
    /// Environment type name, as requested by clients.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Port the application listens on inside the workload.
    pub internal_port: u16,
    /// Entrypoint command override.
    pub start_command: Option<Vec<String>>,
    /// Ordered post-launch recipe. Empty means no configuration stage.
    pub recipe: Vec<ConfigStep>,
    /// Host whose presence in the in-workload response head means the
    /// recipe has not taken effect yet.
    pub stale_redirect_marker: Option<String>,
}

impl EnvironmentTemplate {
    /// Template with no recipe.
    pub fn new(name: impl Into<String>, image: impl Into<String>, internal_port: u16) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            internal_port,
            start_command: None,
            recipe: Vec::new(),
            stale_redirect_marker: None,
        }
    }

    /// Set the entrypoint command override.
    pub fn with_start_command(mut self, command: &[&str]) -> Self {
        self.start_command = Some(command.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Set the post-launch recipe.
    pub fn with_recipe(mut self, recipe: Vec<ConfigStep>) -> Self {
        self.recipe = recipe;
        self
    }

    /// Set the stale redirect marker.
    pub fn with_stale_marker(mut self, marker: impl Into<String>) -> Self {
        self.stale_redirect_marker = Some(marker.into());
        self
    }

    /// Whether this environment type has a configuration stage.
    pub fn needs_configuration(&self) -> bool {
        !self.recipe.is_empty()
    }

    /// Command that prints the status line and `Location` header the
    /// application returns from inside its own workload.
    pub fn readiness_command(&self) -> String {
        format!(
            "curl -I -sS http://127.0.0.1:{}/ | egrep -i '^HTTP/|^Location:' || true",
            self.internal_port
        )
    }
}

fn magento_recipe() -> Vec<ConfigStep> {
    let off = || StepValue::literal("0");
    vec![
        ConfigStep::magento_set("web/unsecure/base_url", StepValue::BaseUrlWithSlash),
        ConfigStep::magento_set("web/secure/base_url", StepValue::BaseUrlWithSlash),
        ConfigStep::magento_set("web/url/redirect_to_base", off()),
        ConfigStep::magento_set("web/seo/use_rewrites", off()),
        ConfigStep::MagentoConfigUpsert {
            db: MysqlCredentials {
                user: "magentouser".to_string(),
                password: "MyPassword".to_string(),
                database: "magentodb".to_string(),
            },
            entries: vec![
                ("web/unsecure/base_url".to_string(), StepValue::BaseUrlWithSlash),
                ("web/secure/base_url".to_string(), StepValue::BaseUrlWithSlash),
                ("web/url/redirect_to_base".to_string(), off()),
                ("web/seo/use_rewrites".to_string(), off()),
            ],
        },
        ConfigStep::shell_tolerant(format!("{} cache:flush", MAGENTO_CLI)),
        ConfigStep::shell(
            "rm -rf /var/www/magento2/var/cache/* /var/www/magento2/var/page_cache/* || true",
        ),
        ConfigStep::shell("command -v redis-cli >/dev/null 2>&1 && redis-cli FLUSHALL || true"),
    ]
}

fn gitlab_recipe() -> Vec<ConfigStep> {
    vec![
        ConfigStep::GitlabExternalUrl {
            config_file: "/etc/gitlab/gitlab.rb".to_string(),
        },
        ConfigStep::Pause(Duration::from_secs(20)),
        ConfigStep::shell("gitlab-ctl reconfigure"),
    ]
}

/// The set of environment types this control plane can provision.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: Vec<EnvironmentTemplate>,
}

impl TemplateCatalog {
    /// Build a catalog from templates, keeping their order.
    pub fn new(templates: Vec<EnvironmentTemplate>) -> Self {
        Self { templates }
    }

    /// The built-in WebArena environments.
    pub fn builtin() -> Self {
        Self::new(vec![
            EnvironmentTemplate::new("shopping", "shopping_final_0712", 80)
                .with_recipe(magento_recipe())
                .with_stale_marker(PLACEHOLDER_HOST),
            EnvironmentTemplate::new("shopping_admin", "shopping_admin_final_0719", 80)
                .with_recipe(magento_recipe())
                .with_stale_marker(PLACEHOLDER_HOST),
            EnvironmentTemplate::new("reddit", "postmill-populated-exposed-withimg", 80),
            EnvironmentTemplate::new("gitlab", "gitlab-populated-final-port8023", 8023)
                .with_start_command(&["/opt/gitlab/embedded/bin/runsvdir-start"])
                .with_recipe(gitlab_recipe())
                .with_stale_marker(PLACEHOLDER_HOST),
        ])
    }

    /// Add a template, replacing any existing one of the same name.
    pub fn with_template(mut self, template: EnvironmentTemplate) -> Self {
        match self.templates.iter_mut().find(|t| t.name == template.name) {
            Some(existing) => *existing = template,
            None => self.templates.push(template),
        }
        self
    }

    /// Look up a template by exact name.
    pub fn get(&self, name: &str) -> Option<&EnvironmentTemplate> {
        self.templates.iter().find(|t| t.name == name)
    }

    /// Environment type names in catalog order.
    pub fn names(&self) -> Vec<String> {
        self.templates.iter().map(|t| t.name.clone()).collect()
    }

    /// Normalize a requested name and look it up.
    pub fn resolve(&self, requested: &str) -> Result<&EnvironmentTemplate> {
        let name = normalize_name(requested);
        self.get(&name).ok_or_else(|| Error::UnknownEnvironmentType {
            name,
            available: self.names(),
        })
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Trim and lowercase an environment type name.
pub fn normalize_name(requested: &str) -> String {
    requested.trim().to_lowercase()
}
