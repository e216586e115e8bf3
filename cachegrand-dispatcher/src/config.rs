//! The slice of server configuration the dispatcher needs to enforce
//! limits, gate authentication, and disable commands. `cachegrand-config`
//! owns the full configuration file; this is the subset handed down to
//! avoid the dispatcher depending on the config crate.

pub struct DispatcherConfig {
    pub max_key_length: usize,
    pub max_command_length: usize,
    pub max_command_arguments: usize,
    pub require_authentication: bool,
    pub password: Option<String>,
    pub disabled_commands: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_key_length: 512,
            max_command_length: 64 * 1024,
            max_command_arguments: 128,
            require_authentication: false,
            password: None,
            disabled_commands: Vec::new(),
        }
    }
}

impl DispatcherConfig {
    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled_commands.iter().any(|c| c.eq_ignore_ascii_case(name))
    }
}
