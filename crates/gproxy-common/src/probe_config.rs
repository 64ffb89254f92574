use serde::{Deserialize, Serialize};

/// Merged probe-filter policy (§4.2). The wire config document keeps the
/// historical two-key split (`probe_request` / `probe_filter`); internally
/// we fold both into one ordered set of rules so there is a single pipeline
/// instead of middleware-vs-log-filter split (see DESIGN.md Open Question 2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFilterConfig {
    pub allowed_methods: Vec<String>,
    pub path_blocklist: Vec<String>,
    pub path_prefix_blocklist: Vec<String>,
    pub user_agent_substrings: Vec<String>,
    pub ip_blocklist: Vec<String>,
}

impl Default for ProbeFilterConfig {
    fn default() -> Self {
        Self {
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "PUT".to_string(),
                "DELETE".to_string(),
                "PATCH".to_string(),
                "HEAD".to_string(),
                "OPTIONS".to_string(),
            ],
            path_blocklist: vec![
                "/".to_string(),
                "/favicon.ico".to_string(),
                "/.env".to_string(),
                "/wp-login.php".to_string(),
                "/robots.txt".to_string(),
            ],
            path_prefix_blocklist: vec![
                "/wp-admin".to_string(),
                "/.git".to_string(),
                "/phpmyadmin".to_string(),
                "/cgi-bin".to_string(),
            ],
            user_agent_substrings: vec![
                "CensysInspect".to_string(),
                "Expanse, a Palo Alto Networks company".to_string(),
                "masscan".to_string(),
                "zgrab".to_string(),
                "nmap".to_string(),
            ],
            ip_blocklist: Vec::new(),
        }
    }
}

/// The two wire-format sub-documents the config file actually carries
/// (spec §6: `probe_request` holds the blocklists/allowed methods,
/// `probe_filter` holds the user-agent substring list).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeRequestDoc {
    pub allowed_methods: Option<Vec<String>>,
    pub path_blocklist: Option<Vec<String>>,
    pub path_prefix_blocklist: Option<Vec<String>>,
    pub ip_blocklist: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeFilterDoc {
    pub user_agent_substrings: Option<Vec<String>>,
}

impl ProbeFilterConfig {
    pub fn merge(mut self, request: Option<ProbeRequestDoc>, filter: Option<ProbeFilterDoc>) -> Self {
        if let Some(request) = request {
            if let Some(v) = request.allowed_methods {
                self.allowed_methods = v;
            }
            if let Some(v) = request.path_blocklist {
                self.path_blocklist = v;
            }
            if let Some(v) = request.path_prefix_blocklist {
                self.path_prefix_blocklist = v;
            }
            if let Some(v) = request.ip_blocklist {
                self.ip_blocklist = v;
            }
        }
        if let Some(filter) = filter {
            if let Some(v) = filter.user_agent_substrings {
                self.user_agent_substrings = v;
            }
        }
        self
    }
}
