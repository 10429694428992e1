/// Elements the host treats as in-app navigation when clicked.
pub const LINK_SELECTOR: &str = "a[href], [data-navigate], [data-href], [role=\"link\"]";

const FOREIGN_SCHEMES: [&str; 4] = ["mailto:", "tel:", "javascript:", "data:"];

/// The parts of a clicked element that decide whether it navigates in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkCandidate {
    pub href: Option<String>,
    pub target: Option<String>,
    pub download: bool,
    pub data_navigate: bool,
    pub data_href: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClickModifiers {
    pub button: i16,
    pub meta: bool,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
}

impl ClickModifiers {
    /// Modified or non-primary clicks open new tabs and never change the route.
    pub fn is_plain_primary(self) -> bool {
        self.button == 0 && !(self.meta || self.ctrl || self.shift || self.alt)
    }
}

#[cfg_attr(test, allow(dead_code))]
impl LinkCandidate {
    pub fn is_in_app(&self, origin: &str) -> bool {
        if self.data_navigate || self.data_href.is_some() {
            return true;
        }
        if let Some(href) = self.href.as_deref() {
            return self.is_same_document_href(href.trim(), origin);
        }
        self.role
            .as_deref()
            .is_some_and(|role| role.trim().eq_ignore_ascii_case("link"))
    }

    fn is_same_document_href(&self, href: &str, origin: &str) -> bool {
        if href.is_empty() || self.download {
            return false;
        }
        if let Some(target) = self.target.as_deref().map(str::trim)
            && !target.is_empty()
            && target != "_self"
        {
            return false;
        }
        let lowered = href.to_ascii_lowercase();
        if FOREIGN_SCHEMES
            .iter()
            .any(|scheme| lowered.starts_with(scheme))
        {
            return false;
        }
        if lowered.starts_with("http://") || lowered.starts_with("https://") || href.starts_with("//")
        {
            return !origin.is_empty() && same_origin(href, origin);
        }
        true
    }
}

fn same_origin(href: &str, origin: &str) -> bool {
    let origin = origin.trim_end_matches('/');
    let absolute = if let Some(rest) = href.strip_prefix("//") {
        let scheme = origin.split("//").next().unwrap_or("https:");
        format!("{scheme}//{rest}")
    } else {
        href.to_string()
    };
    absolute
        .strip_prefix(origin)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?', '#']))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://media.example.org";

    fn anchor(href: &str) -> LinkCandidate {
        LinkCandidate {
            href: Some(href.to_string()),
            ..LinkCandidate::default()
        }
    }

    #[test]
    fn relative_and_hash_anchors_are_in_app() {
        assert!(anchor("/web/index.html#/details?id=7").is_in_app(ORIGIN));
        assert!(anchor("#/home").is_in_app(ORIGIN));
        assert!(anchor("details?id=7").is_in_app(ORIGIN));
        assert!(anchor("https://media.example.org/web/#/tv").is_in_app(ORIGIN));
        assert!(anchor("//media.example.org/web/").is_in_app(ORIGIN));
    }

    #[test]
    fn foreign_targets_are_ignored() {
        assert!(!anchor("https://elsewhere.example.com/").is_in_app(ORIGIN));
        assert!(!anchor("https://media.example.org.evil.test/").is_in_app(ORIGIN));
        assert!(!anchor("mailto:ops@example.org").is_in_app(ORIGIN));
        assert!(!anchor("  ").is_in_app(ORIGIN));

        let mut blank = anchor("/web/");
        blank.target = Some("_blank".to_string());
        assert!(!blank.is_in_app(ORIGIN));

        let mut download = anchor("/files/export.csv");
        download.download = true;
        assert!(!download.is_in_app(ORIGIN));
    }

    #[test]
    fn data_attributes_and_link_role_count_as_navigation() {
        let navigate = LinkCandidate {
            data_navigate: true,
            ..LinkCandidate::default()
        };
        assert!(navigate.is_in_app(ORIGIN));

        let data_href = LinkCandidate {
            data_href: Some(String::new()),
            ..LinkCandidate::default()
        };
        assert!(data_href.is_in_app(ORIGIN));

        let role = LinkCandidate {
            role: Some("Link".to_string()),
            ..LinkCandidate::default()
        };
        assert!(role.is_in_app(ORIGIN));

        let button = LinkCandidate {
            role: Some("button".to_string()),
            ..LinkCandidate::default()
        };
        assert!(!button.is_in_app(ORIGIN));
    }

    #[test]
    fn only_plain_primary_clicks_navigate() {
        assert!(ClickModifiers::default().is_plain_primary());
        assert!(
            !ClickModifiers {
                ctrl: true,
                ..ClickModifiers::default()
            }
            .is_plain_primary()
        );
        assert!(
            !ClickModifiers {
                button: 1,
                ..ClickModifiers::default()
            }
            .is_plain_primary()
        );
    }
}
