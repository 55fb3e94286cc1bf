//! Extension points that can influence a request.

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use axum::http::HeaderMap;

use crate::events::RequestInfo;
use crate::http::context::RequestContext;

type BanHook = Arc<dyn Fn(&RequestInfo) -> Option<String> + Send + Sync>;
type PostProcessingHook = Arc<dyn Fn(&mut RequestContext) + Send + Sync>;
type AnalyticsHook = Arc<dyn Fn(&str, &HeaderMap) + Send + Sync>;

/// Registered request extensions.
#[derive(Default)]
pub struct Extensions {
    ban_hooks: RwLock<Vec<BanHook>>,
    post_processing: RwLock<Vec<PostProcessingHook>>,
    analytics: OnceLock<AnalyticsHook>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ban hook. Returning `Some(reason)` marks the request as blocked.
    pub fn on_ban_request<F>(&self, hook: F)
    where
        F: Fn(&RequestInfo) -> Option<String> + Send + Sync + 'static,
    {
        self.ban_hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    /// Register a hook run on the context of every matched route before its handler.
    pub fn on_post_processing<F>(&self, hook: F)
    where
        F: Fn(&mut RequestContext) + Send + Sync + 'static,
    {
        self.post_processing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    /// Register the request statistics callback. Only the first registration is kept.
    pub fn on_analytics<F>(&self, hook: F) -> bool
    where
        F: Fn(&str, &HeaderMap) + Send + Sync + 'static,
    {
        self.analytics.set(Arc::new(hook)).is_ok()
    }

    /// Ask every ban hook once; the first reason wins.
    pub fn ban_decision(&self, request: &RequestInfo) -> Option<String> {
        let hooks: Vec<BanHook> = self
            .ban_hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        hooks.iter().find_map(|hook| hook(request))
    }

    pub fn post_process(&self, ctx: &mut RequestContext) {
        let hooks: Vec<PostProcessingHook> = self
            .post_processing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            hook(ctx);
        }
    }

    pub fn analytics(&self, ip: &str, headers: &HeaderMap) {
        if let Some(hook) = self.analytics.get() {
            hook(ip, headers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_first_ban_reason_wins() {
        let ext = Extensions::new();
        ext.on_ban_request(|_| None);
        ext.on_ban_request(|r| (r.ip == "10.0.0.1").then(|| "tor".to_string()));
        ext.on_ban_request(|_| Some("late".to_string()));

        let mut info = RequestInfo {
            ip: "10.0.0.1".into(),
            ..Default::default()
        };
        assert_eq!(ext.ban_decision(&info).as_deref(), Some("tor"));

        info.ip = "10.0.0.2".into();
        assert_eq!(ext.ban_decision(&info).as_deref(), Some("late"));
    }

    #[test]
    fn test_analytics_first_registration_kept() {
        let ext = Extensions::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        assert!(ext.on_analytics(move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!ext.on_analytics(|_, _| panic!("second analytics hook must not run")));

        ext.analytics("1.2.3.4", &HeaderMap::new());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
