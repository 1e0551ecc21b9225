//! `gemara://` URL construction and parsing.

pub const SCHEME: &str = "gemara://";

/// `gemara://policies/{policy}/controls/{control}/requirements/{req}`
pub fn policy_requirement_url(policy_id: &str, control_id: &str, requirement_id: &str) -> String {
    format!(
        "{}policies/{}/controls/{}/requirements/{}",
        SCHEME, policy_id, control_id, requirement_id
    )
}

/// `gemara://controls/{catalog}/{control}/requirements/{req}`
pub fn base_requirement_url(catalog_id: &str, control_id: &str, requirement_id: &str) -> String {
    format!(
        "{}controls/{}/{}/requirements/{}",
        SCHEME, catalog_id, control_id, requirement_id
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GemaraUrl {
    Policy {
        policy_id: String,
        control_id: String,
        requirement_id: String,
    },
    Base {
        catalog_id: String,
        control_id: String,
        requirement_id: String,
    },
}

impl GemaraUrl {
    pub fn parse(url: &str) -> Option<GemaraUrl> {
        let rest = url.strip_prefix(SCHEME)?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        match parts.as_slice() {
            ["policies", policy, "controls", control, "requirements", req] => {
                Some(GemaraUrl::Policy {
                    policy_id: policy.to_string(),
                    control_id: control.to_string(),
                    requirement_id: req.to_string(),
                })
            }
            ["controls", catalog, control, "requirements", req] => Some(GemaraUrl::Base {
                catalog_id: catalog.to_string(),
                control_id: control.to_string(),
                requirement_id: req.to_string(),
            }),
            _ => None,
        }
    }

    pub fn requirement_id(&self) -> &str {
        match self {
            GemaraUrl::Policy { requirement_id, .. } | GemaraUrl::Base { requirement_id, .. } => {
                requirement_id
            }
        }
    }
}

/// Record file name for a requirement: `CCC.Core.CN01.TR01` → `ccc-core-cn01-tr01.requirement.json`.
pub fn requirement_file_name(requirement_id: &str) -> String {
    format!(
        "{}.requirement.json",
        requirement_id.replace('.', "-").to_lowercase()
    )
}
