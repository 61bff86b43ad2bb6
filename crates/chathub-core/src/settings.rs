//! Connection, settings and layout intents

use chrono::Utc;

use crate::{
    backend::Backend,
    error::{Error, Result},
    events::StoreEvent,
    model::{AppSettings, Connection, View},
    store::Store,
};

/// Optional edits for [`Store::update_connection`]; `None` leaves a field as is
#[derive(Debug, Clone, Default)]
pub struct ConnectionPatch {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub use_https: Option<bool>,
    pub is_default: Option<bool>,
}

impl Store {
    /// Add a connection. One added as default takes over from the previous
    /// default.
    pub fn add_connection(&self, connection: Connection) -> String {
        let id = connection.id.clone();
        self.update(|inner| {
            if connection.is_default {
                for existing in &mut inner.state.connections {
                    existing.is_default = false;
                }
            }
            inner.state.connections.push(connection);
            inner.emit(StoreEvent::SettingsChanged);
        });
        id
    }

    /// Apply a patch to one connection. Making it the default takes the flag
    /// from every other connection.
    pub fn update_connection(&self, id: &str, patch: ConnectionPatch) -> Result<()> {
        self.update(|inner| {
            let connection = inner
                .state
                .connections
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| Error::ConnectionNotFound(id.to_string()))?;
            if let Some(name) = patch.name {
                connection.name = name;
            }
            if let Some(host) = patch.host {
                connection.host = host;
            }
            if let Some(port) = patch.port {
                connection.port = port;
            }
            if let Some(use_https) = patch.use_https {
                connection.use_https = use_https;
            }
            if patch.is_default == Some(true) {
                for other in &mut inner.state.connections {
                    other.is_default = other.id == id;
                }
            } else if patch.is_default == Some(false) {
                connection.is_default = false;
            }
            inner.emit(StoreEvent::SettingsChanged);
            Ok(())
        })
    }

    pub fn remove_connection(&self, id: &str) -> Result<()> {
        self.update(|inner| {
            let before = inner.state.connections.len();
            inner.state.connections.retain(|c| c.id != id);
            if inner.state.connections.len() == before {
                return Err(Error::ConnectionNotFound(id.to_string()));
            }
            if inner.state.active_connection_id.as_deref() == Some(id) {
                inner.state.active_connection_id = None;
            }
            inner.emit(StoreEvent::SettingsChanged);
            Ok(())
        })
    }

    /// Check a connection through `backend` and make it the active one if it
    /// answers. Returns whether it did.
    pub async fn activate_connection(&self, backend: &dyn Backend, id: &str) -> Result<bool> {
        let connection = self
            .read(|state| state.connection(id).cloned())
            .ok_or_else(|| Error::ConnectionNotFound(id.to_string()))?;

        let reachable = backend
            .test_connection(&connection.host, connection.port, connection.use_https)
            .await?;
        if !reachable {
            tracing::warn!("Connection {} is not reachable", connection.base_url());
            return Ok(false);
        }

        self.update(|inner| {
            let connection = inner
                .state
                .connections
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| Error::ConnectionNotFound(id.to_string()))?;
            connection.last_connected_at = Some(Utc::now());
            inner.state.active_connection_id = Some(id.to_string());
            inner.emit(StoreEvent::SettingsChanged);
            Ok(true)
        })
    }

    pub fn set_selected_model(&self, model: Option<String>) {
        self.update(|inner| {
            inner.state.selected_model = model;
            inner.emit(StoreEvent::SettingsChanged);
        });
    }

    /// Replace the application settings
    pub fn update_settings(&self, settings: AppSettings) {
        self.update(|inner| {
            inner.state.settings = settings;
            inner.emit(StoreEvent::SettingsChanged);
        });
    }

    pub fn set_view(&self, view: View) {
        self.update(|inner| {
            inner.state.ui.current_view = view;
            inner.emit(StoreEvent::SettingsChanged);
        });
    }

    /// Returns whether the sidebar is now open
    pub fn toggle_sidebar(&self) -> bool {
        self.update(|inner| {
            inner.state.ui.sidebar_open = !inner.state.ui.sidebar_open;
            inner.emit(StoreEvent::SettingsChanged);
            inner.state.ui.sidebar_open
        })
    }

    pub fn set_sidebar_width(&self, width: u32) {
        self.update(|inner| {
            inner.state.ui.sidebar_width = width;
            inner.emit(StoreEvent::SettingsChanged);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;

    #[tokio::test]
    async fn test_activate_reachable_connection() {
        let store = Store::default();
        let id = store.add_connection(Connection::new("Box", "10.0.0.5", 11434, false));
        let backend = ScriptedBackend::new(vec![]);

        assert!(store.activate_connection(backend.as_ref(), &id).await.unwrap());
        let state = store.snapshot();
        assert_eq!(state.active_connection_id.as_deref(), Some(id.as_str()));
        assert!(state.connection(&id).unwrap().last_connected_at.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_connection_not_activated() {
        let store = Store::default();
        let id = store.add_connection(Connection::new("Box", "10.0.0.5", 11434, false));
        let backend = ScriptedBackend::new(vec![]);
        *backend.reachable.lock() = false;

        assert!(!store.activate_connection(backend.as_ref(), &id).await.unwrap());
        assert!(store.snapshot().active_connection_id.is_none());

        assert!(matches!(
            store.activate_connection(backend.as_ref(), "nope").await,
            Err(Error::ConnectionNotFound(_))
        ));
    }

    #[test]
    fn test_new_default_connection_replaces_old() {
        let store = Store::default();
        let mut conn = Connection::new("Remote", "gpu.lan", 11434, true);
        conn.is_default = true;
        let id = store.add_connection(conn);

        let defaults: Vec<String> = store
            .snapshot()
            .connections
            .into_iter()
            .filter(|c| c.is_default)
            .map(|c| c.id)
            .collect();
        assert_eq!(defaults, vec![id]);
    }

    #[test]
    fn test_update_connection_patch() {
        let store = Store::default();
        let local = store.snapshot().connections[0].id.clone();
        let remote = store.add_connection(Connection::new("Remote", "gpu.lan", 11434, false));

        store
            .update_connection(
                &remote,
                ConnectionPatch {
                    port: Some(8080),
                    use_https: Some(true),
                    is_default: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        let state = store.snapshot();
        let updated = state.connection(&remote).unwrap();
        assert_eq!(updated.base_url(), "https://gpu.lan:8080");
        assert_eq!(updated.name, "Remote");
        assert!(updated.is_default);
        assert!(!state.connection(&local).unwrap().is_default);

        assert!(matches!(
            store.update_connection("nope", ConnectionPatch::default()),
            Err(Error::ConnectionNotFound(_))
        ));
    }

    #[test]
    fn test_remove_active_connection_clears_it() {
        let store = Store::default();
        let id = store.snapshot().connections[0].id.clone();
        store
            .update(|inner| inner.state.active_connection_id = Some(id.clone()));
        store.remove_connection(&id).unwrap();
        assert!(store.snapshot().active_connection_id.is_none());
        assert!(store.remove_connection(&id).is_err());
    }

    #[test]
    fn test_settings_and_layout() {
        let store = Store::default();
        let mut rx = store.subscribe();
        let mut settings = store.snapshot().settings;
        settings.sync_config.enabled = true;
        store.update_settings(settings);
        store.set_view(View::Models);
        assert!(!store.toggle_sidebar());
        store.set_sidebar_width(320);

        let state = store.snapshot();
        assert!(state.settings.sync_config.enabled);
        assert_eq!(state.ui.current_view, View::Models);
        assert_eq!(state.ui.sidebar_width, 320);
        for _ in 0..4 {
            assert_eq!(rx.try_recv().unwrap(), StoreEvent::SettingsChanged);
        }
    }
}
