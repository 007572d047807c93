//! Notification fan-out: one inbound event, several alert channels.
//!
//! Per event, in order: alert sound, desktop alert (granted permission
//! only), in-app toast, then one cache invalidation. Each step logs and
//! swallows its own failure; `deliver` never fails to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use portal_connectors::{
    AlertSound, CacheSink, DesktopAlert, DesktopNotifier, Permission, Toast, ToastSink,
};
use portal_protocol::InboundEvent;
use tracing::{debug, info, warn};

/// Cache key refreshed after every delivered notification
pub const NOTIFICATIONS_CACHE_KEY: &str = "notifications";

#[derive(Debug, Clone)]
pub struct FanOutConfig {
    /// Desktop alerts are closed after this long unless clicked first
    pub desktop_alert_ttl: Duration,
    pub toast_ttl: Duration,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            desktop_alert_ttl: Duration::from_secs(5),
            toast_ttl: Duration::from_secs(5),
        }
    }
}

pub struct NotificationFanOut {
    toasts: Arc<dyn ToastSink>,
    cache: Arc<dyn CacheSink>,
    sound: Option<Arc<dyn AlertSound>>,
    desktop: Option<Arc<dyn DesktopNotifier>>,
    config: FanOutConfig,
    permission: Mutex<Option<Permission>>,
    prompted: AtomicBool,
}

impl NotificationFanOut {
    /// Toast-only fan-out. Sound and desktop alerts are opt-in.
    pub fn new(toasts: Arc<dyn ToastSink>, cache: Arc<dyn CacheSink>) -> Self {
        Self {
            toasts,
            cache,
            sound: None,
            desktop: None,
            config: FanOutConfig::default(),
            permission: Mutex::new(None),
            prompted: AtomicBool::new(false),
        }
    }

    pub fn with_sound(mut self, sound: Arc<dyn AlertSound>) -> Self {
        self.sound = Some(sound);
        self
    }

    pub fn with_desktop(mut self, desktop: Arc<dyn DesktopNotifier>) -> Self {
        self.desktop = Some(desktop);
        self
    }

    pub fn with_config(mut self, config: FanOutConfig) -> Self {
        self.config = config;
        self
    }

    /// Last known desktop permission, `None` before it was first read or
    /// when desktop alerts are unavailable.
    pub fn permission(&self) -> Option<Permission> {
        *self.permission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the desktop permission and, if the user was never asked, ask
    /// once. Granted and denied are final.
    pub async fn prepare(&self) {
        let Some(desktop) = self.desktop.clone() else {
            return;
        };

        let mut permission = desktop.permission();
        if permission == Permission::Default && !self.prompted.swap(true, Ordering::SeqCst) {
            match desktop.request_permission().await {
                Ok(answer) => {
                    info!(
                        component = "fan_out",
                        event = "fan_out.permission_answered",
                        permission = ?answer,
                        "Desktop alert permission answered"
                    );
                    permission = answer;
                }
                Err(e) => warn!(
                    component = "fan_out",
                    event = "fan_out.permission_request_failed",
                    error = %e,
                    "Desktop alert permission request failed"
                ),
            }
        }
        self.store_permission(permission);
    }

    /// Run every alert channel for `event`.
    pub fn deliver(&self, event: &InboundEvent) {
        debug!(
            component = "fan_out",
            event = "fan_out.deliver",
            event_id = %event.id,
            kind = %event.kind,
            "Delivering notification"
        );

        self.play_sound(event);
        self.show_desktop(event);
        self.show_toast(event);
        self.cache.invalidate(NOTIFICATIONS_CACHE_KEY);
    }

    fn store_permission(&self, permission: Permission) {
        *self.permission.lock().unwrap_or_else(PoisonError::into_inner) = Some(permission);
    }

    fn play_sound(&self, event: &InboundEvent) {
        let Some(sound) = &self.sound else {
            return;
        };
        if let Err(e) = sound.play_from_start() {
            warn!(
                component = "fan_out",
                event = "fan_out.sound_failed",
                event_id = %event.id,
                error = %e,
                "Alert sound failed"
            );
        }
    }

    fn show_desktop(&self, event: &InboundEvent) {
        let Some(desktop) = &self.desktop else {
            return;
        };
        let permission = match self.permission() {
            Some(permission) => permission,
            None => {
                let permission = desktop.permission();
                self.store_permission(permission);
                permission
            }
        };
        if permission != Permission::Granted {
            return;
        }

        match desktop.show(&event.title, &event.body) {
            Ok(alert) => self.schedule_dismiss(desktop.clone(), alert),
            Err(e) => warn!(
                component = "fan_out",
                event = "fan_out.desktop_failed",
                event_id = %event.id,
                error = %e,
                "Desktop alert failed"
            ),
        }
    }

    fn schedule_dismiss(&self, desktop: Arc<dyn DesktopNotifier>, alert: DesktopAlert) {
        let DesktopAlert { id, clicked } = alert;
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                // Nothing can run the timer, so don't leave the alert up.
                desktop.close(&id);
                return;
            }
        };

        let ttl = self.config.desktop_alert_ttl;
        runtime.spawn(async move {
            let expiry = tokio::time::sleep(ttl);
            tokio::pin!(expiry);
            tokio::select! {
                Ok(()) = clicked => {
                    debug!(
                        component = "fan_out",
                        event = "fan_out.desktop_clicked",
                        alert_id = %id,
                        "Desktop alert clicked"
                    );
                    desktop.focus_window();
                }
                _ = &mut expiry => {}
            }
            desktop.close(&id);
        });
    }

    fn show_toast(&self, event: &InboundEvent) {
        let toast = Toast {
            title: event.title.clone(),
            body: event.body.clone(),
            duration: self.config.toast_ttl,
        };
        if let Err(e) = self.toasts.show(toast) {
            warn!(
                component = "fan_out",
                event = "fan_out.toast_failed",
                event_id = %event.id,
                error = %e,
                "Toast failed"
            );
        }
    }
}
