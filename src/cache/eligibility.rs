//! Eligibility gate.
//!
//! Decides whether a request may be served from, or written to, the page
//! cache. The same rules run on both paths: a request that would not be
//! stored must never be answered from an old entry either.

use std::fmt;
use std::sync::Arc;

use axum::http::Method;

use super::config::{CachePolicy, TRACKING_PARAMS};
use super::request::{RequestContext, Surface};

/// Final say over a request that passed every built-in rule.
pub trait CacheVeto: Send + Sync {
    /// Return `false` to keep this request out of the cache.
    fn allow(&self, request: &RequestContext) -> bool;
}

impl<F> CacheVeto for F
where
    F: Fn(&RequestContext) -> bool + Send + Sync,
{
    fn allow(&self, request: &RequestContext) -> bool {
        self(request)
    }
}

/// Why a request bypasses the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    Disabled,
    Surface,
    Method,
    RequestBody,
    QueryParams,
    Authenticated,
    Excluded,
    NotFound,
    Search,
    Vetoed,
}

impl Ineligible {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Surface => "surface",
            Self::Method => "method",
            Self::RequestBody => "request_body",
            Self::QueryParams => "query_params",
            Self::Authenticated => "authenticated",
            Self::Excluded => "excluded",
            Self::NotFound => "not_found",
            Self::Search => "search",
            Self::Vetoed => "vetoed",
        }
    }
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule set shared by the read and write paths.
#[derive(Clone)]
pub struct EligibilityGate {
    policy: Arc<CachePolicy>,
    vetoes: Vec<Arc<dyn CacheVeto>>,
}

impl EligibilityGate {
    pub fn new(policy: Arc<CachePolicy>) -> Self {
        Self {
            policy,
            vetoes: Vec::new(),
        }
    }

    /// Register an extension hook consulted after the built-in rules.
    pub fn with_veto(mut self, veto: impl CacheVeto + 'static) -> Self {
        self.vetoes.push(Arc::new(veto));
        self
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn can_serve_or_store(&self, request: &RequestContext) -> bool {
        self.evaluate(request).is_ok()
    }

    /// Run every rule, cheapest first, stopping at the first failure.
    pub fn evaluate(&self, request: &RequestContext) -> Result<(), Ineligible> {
        if !self.policy.page_cache_enabled {
            return Err(Ineligible::Disabled);
        }

        if request.surface != Surface::Public {
            return Err(Ineligible::Surface);
        }

        if !is_retrieval(&request.method) {
            return Err(Ineligible::Method);
        }

        if request.has_body {
            return Err(Ineligible::RequestBody);
        }

        if !only_tracking_params(request) {
            return Err(Ineligible::QueryParams);
        }

        if request.authenticated && !self.policy.cache_logged_in_users {
            return Err(Ineligible::Authenticated);
        }

        let target = request.target();
        if self
            .policy
            .excluded_patterns()
            .any(|pattern| target.contains(pattern))
        {
            return Err(Ineligible::Excluded);
        }

        if request.not_found {
            return Err(Ineligible::NotFound);
        }

        if request.search {
            return Err(Ineligible::Search);
        }

        if !self.vetoes.iter().all(|veto| veto.allow(request)) {
            return Err(Ineligible::Vetoed);
        }

        Ok(())
    }
}

/// `HEAD` shares the lookup of `GET`; it is never written since it has no body.
fn is_retrieval(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

fn only_tracking_params(request: &RequestContext) -> bool {
    request
        .query_param_names()
        .iter()
        .all(|name| TRACKING_PARAMS.contains(&name.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> EligibilityGate {
        EligibilityGate::new(Arc::new(CachePolicy::default()))
    }

    fn gate_with(policy: CachePolicy) -> EligibilityGate {
        EligibilityGate::new(Arc::new(policy))
    }

    #[test]
    fn anonymous_get_is_eligible() {
        assert!(gate().can_serve_or_store(&RequestContext::get("/blog/post-1")));
        assert!(gate().can_serve_or_store(&RequestContext::get("/")));
    }

    #[test]
    fn disabled_cache_rejects_everything() {
        let gate = gate_with(CachePolicy {
            page_cache_enabled: false,
            ..Default::default()
        });
        assert_eq!(
            gate.evaluate(&RequestContext::get("/")),
            Err(Ineligible::Disabled)
        );
    }

    #[test]
    fn only_tracking_params_are_tolerated() {
        let gate = gate();
        assert!(gate.can_serve_or_store(&RequestContext::get(
            "/blog/post-1?utm_source=news&utm_campaign=spring"
        )));
        assert!(gate.can_serve_or_store(&RequestContext::get("/blog/post-1?")));
        assert_eq!(
            gate.evaluate(&RequestContext::get("/blog/post-1?ref=newsletter")),
            Err(Ineligible::QueryParams)
        );
        assert_eq!(
            gate.evaluate(&RequestContext::get("/blog?page=2")),
            Err(Ineligible::QueryParams)
        );
        assert_eq!(
            gate.evaluate(&RequestContext::get("/blog?utm_source=a&x=")),
            Err(Ineligible::QueryParams)
        );
    }

    #[test]
    fn write_methods_and_bodies_are_rejected() {
        let gate = gate();
        let post = RequestContext::get("/contact").with_method(Method::POST);
        assert_eq!(gate.evaluate(&post), Err(Ineligible::Method));

        let head = RequestContext::get("/contact").with_method(Method::HEAD);
        assert!(gate.can_serve_or_store(&head));

        let mut with_body = RequestContext::get("/contact");
        with_body.has_body = true;
        assert_eq!(gate.evaluate(&with_body), Err(Ineligible::RequestBody));
    }

    #[test]
    fn non_public_surfaces_are_rejected() {
        let mut admin = RequestContext::get("/admin/settings");
        admin.surface = Surface::Admin;
        assert_eq!(gate().evaluate(&admin), Err(Ineligible::Surface));

        let mut cron = RequestContext::get("/tasks");
        cron.surface = Surface::Background;
        assert_eq!(gate().evaluate(&cron), Err(Ineligible::Surface));
    }

    #[test]
    fn logged_in_users_depend_on_policy() {
        let request = RequestContext::get("/blog").authenticated(true);
        assert_eq!(gate().evaluate(&request), Err(Ineligible::Authenticated));

        let permissive = gate_with(CachePolicy {
            cache_logged_in_users: true,
            ..Default::default()
        });
        assert!(permissive.can_serve_or_store(&request));
    }

    #[test]
    fn exclusion_patterns_are_case_sensitive_substrings() {
        let gate = gate_with(CachePolicy {
            excluded_url_patterns: vec!["/members".to_string()],
            ..Default::default()
        });
        assert_eq!(
            gate.evaluate(&RequestContext::get("/checkout/step-2")),
            Err(Ineligible::Excluded)
        );
        assert_eq!(
            gate.evaluate(&RequestContext::get("/club/members/list")),
            Err(Ineligible::Excluded)
        );
        assert!(gate.can_serve_or_store(&RequestContext::get("/club/Members")));
    }

    #[test]
    fn not_found_and_search_are_rejected() {
        let mut missing = RequestContext::get("/nope");
        missing.not_found = true;
        assert_eq!(gate().evaluate(&missing), Err(Ineligible::NotFound));

        assert_eq!(
            gate().evaluate(&RequestContext::get("/search/rust")),
            Err(Ineligible::Search)
        );
    }

    #[test]
    fn veto_hook_has_final_say() {
        let gate = gate().with_veto(|request: &RequestContext| !request.path.starts_with("/live"));
        assert!(gate.can_serve_or_store(&RequestContext::get("/blog")));
        assert_eq!(
            gate.evaluate(&RequestContext::get("/live/scores")),
            Err(Ineligible::Vetoed)
        );
    }
}
