//! Config registry -- typed settings over the Store with change
//! subscriptions.
//!
//! Values resolve default < environment < stored row. Secret keys are
//! encrypted at rest and redacted on display reads; internal reads get
//! the plaintext. Subscriber callbacks run on a dedicated dispatcher
//! task and fire exactly once per distinct (key, new_value) pair.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use hearth_domain::error::{Error, Result};
use hearth_domain::settings::{self, SETTINGS};
use hearth_store::{SecretCipher, Store};

const REDACTED: &str = "••••••••";

/// Callback invoked with `(key, old_value, new_value)`.
pub type SettingCallback = Arc<dyn Fn(&str, Option<&str>, &str) + Send + Sync>;

struct Subscriber {
    keys: HashSet<String>,
    callback: SettingCallback,
}

type ChangeNotice = (String, Option<String>, String);

pub struct ConfigRegistry {
    store: Arc<Store>,
    cipher: Arc<SecretCipher>,
    cache: RwLock<HashMap<String, String>>,
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    dispatch_tx: mpsc::UnboundedSender<ChangeNotice>,
}

impl ConfigRegistry {
    /// Load the registry: defaults, then environment overrides, then
    /// persisted rows (decrypting secrets). Spawns the callback
    /// dispatcher task; call from within the runtime.
    pub fn new(store: Arc<Store>, cipher: Arc<SecretCipher>) -> Result<Arc<Self>> {
        let mut cache: HashMap<String, String> = HashMap::new();

        for def in SETTINGS {
            cache.insert(def.key.to_string(), def.default.to_string());
        }
        for def in SETTINGS {
            if let Ok(value) = std::env::var(def.key.to_uppercase()) {
                cache.insert(def.key.to_string(), value);
            }
        }
        for (key, value, encrypted) in store.all_settings().map_err(Error::from)? {
            let plain = if encrypted {
                match cipher.decrypt(&value) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "failed to decrypt stored setting, skipping");
                        continue;
                    }
                }
            } else {
                value
            };
            cache.insert(key, plain);
        }

        let subscribers: Arc<RwLock<Vec<Subscriber>>> = Arc::new(RwLock::new(Vec::new()));
        let (dispatch_tx, mut dispatch_rx) = mpsc::unbounded_channel::<ChangeNotice>();

        // Callbacks run here, never under the registry lock.
        let dispatch_subscribers = subscribers.clone();
        tokio::spawn(async move {
            while let Some((key, old, new)) = dispatch_rx.recv().await {
                let callbacks: Vec<SettingCallback> = {
                    let subs = dispatch_subscribers.read();
                    subs.iter()
                        .filter(|s| s.keys.contains(&key))
                        .map(|s| s.callback.clone())
                        .collect()
                };
                for cb in callbacks {
                    cb(&key, old.as_deref(), &new);
                }
            }
        });

        Ok(Arc::new(Self {
            store,
            cipher,
            cache: RwLock::new(cache),
            subscribers,
            dispatch_tx,
        }))
    }

    // ── Reads ─────────────────────────────────────────────────────

    /// Internal read: secrets come back intact.
    pub fn get(&self, key: &str) -> Option<String> {
        self.cache.read().get(key).cloned()
    }

    pub fn get_or_default(&self, key: &str) -> String {
        self.get(key)
            .or_else(|| settings::lookup(key).map(|d| d.default.to_string()))
            .unwrap_or_default()
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key)?.parse().ok()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)?.as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }

    /// Display read: secret values are redacted (empty stays empty).
    pub fn get_display(&self, key: &str) -> Option<String> {
        let value = self.get(key)?;
        if settings::is_secret(key) && !value.is_empty() {
            Some(REDACTED.to_string())
        } else {
            Some(value)
        }
    }

    /// All settings with secrets redacted, sorted by key.
    pub fn all_display(&self) -> Vec<(String, String)> {
        let cache = self.cache.read();
        let mut entries: Vec<(String, String)> = cache
            .iter()
            .map(|(k, v)| {
                let shown = if settings::is_secret(k) && !v.is_empty() {
                    REDACTED.to_string()
                } else {
                    v.clone()
                };
                (k.clone(), shown)
            })
            .collect();
        entries.sort();
        entries
    }

    // ── Writes ────────────────────────────────────────────────────

    /// Set one key. Unchanged values are a no-op (no write, no
    /// callback).
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        settings::validate(key, value).map_err(Error::Config)?;

        let old = self.get(key);
        if old.as_deref() == Some(value) {
            return Ok(());
        }

        let (stored, encrypted) = if settings::is_secret(key) {
            (self.cipher.encrypt(value).map_err(Error::from)?, true)
        } else {
            (value.to_string(), false)
        };
        self.store
            .set_setting(key, &stored, encrypted)
            .map_err(Error::from)?;

        self.cache
            .write()
            .insert(key.to_string(), value.to_string());
        let _ = self
            .dispatch_tx
            .send((key.to_string(), old, value.to_string()));
        Ok(())
    }

    /// Set several keys atomically: all rows land in one transaction,
    /// then callbacks fire per changed key.
    pub fn set_many(&self, entries: &[(String, String)]) -> Result<()> {
        for (key, value) in entries {
            settings::validate(key, value).map_err(Error::Config)?;
        }

        let mut changed: Vec<ChangeNotice> = Vec::new();
        let mut rows: Vec<(String, String, bool)> = Vec::new();
        for (key, value) in entries {
            let old = self.get(key);
            if old.as_deref() == Some(value.as_str()) {
                continue;
            }
            let (stored, encrypted) = if settings::is_secret(key) {
                (self.cipher.encrypt(value).map_err(Error::from)?, true)
            } else {
                (value.clone(), false)
            };
            rows.push((key.clone(), stored, encrypted));
            changed.push((key.clone(), old, value.clone()));
        }

        if rows.is_empty() {
            return Ok(());
        }
        self.store.set_settings_many(&rows).map_err(Error::from)?;

        let mut cache = self.cache.write();
        for (key, _, new) in &changed {
            cache.insert(key.clone(), new.clone());
        }
        drop(cache);

        for notice in changed {
            let _ = self.dispatch_tx.send(notice);
        }
        Ok(())
    }

    /// Subscribe to changes of the given keys.
    pub fn subscribe(&self, keys: &[&str], callback: SettingCallback) {
        self.subscribers.write().push(Subscriber {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            callback,
        });
    }

    /// Plain map of the current values (internal, secrets intact).
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.cache.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn registry() -> Arc<ConfigRegistry> {
        let dir = tempfile::tempdir().unwrap();
        let cipher = Arc::new(SecretCipher::load_or_generate(dir.path()).unwrap());
        let store = Arc::new(Store::open_in_memory().unwrap());
        // Leak the tempdir so the key file outlives the test body.
        std::mem::forget(dir);
        ConfigRegistry::new(store, cipher).unwrap()
    }

    #[tokio::test]
    async fn defaults_are_loaded() {
        let config = registry();
        assert_eq!(config.get_or_default("complexity_threshold"), "50");
        assert_eq!(config.get_int("max_research_tasks"), Some(5));
        assert_eq!(config.get_bool("auth_enabled"), Some(false));
    }

    #[tokio::test]
    async fn set_and_get_roundtrip() {
        let config = registry();
        config.set("persona_tone", "technical").unwrap();
        assert_eq!(config.get("persona_tone").as_deref(), Some("technical"));
    }

    #[tokio::test]
    async fn invalid_values_rejected() {
        let config = registry();
        assert!(config.set("persona_tone", "grumpy").is_err());
        assert!(config.set("complexity_threshold", "140").is_err());
        assert!(config.set("port", "not-a-port").is_err());
    }

    #[tokio::test]
    async fn secrets_redacted_on_display_but_intact_internally() {
        let config = registry();
        config.set("anthropic_api_key", "sk-ant-12345").unwrap();

        assert_eq!(config.get("anthropic_api_key").as_deref(), Some("sk-ant-12345"));
        assert_eq!(config.get_display("anthropic_api_key").as_deref(), Some(REDACTED));

        // The stored row is ciphertext, not the plaintext.
        let (stored, encrypted) = config.store.get_setting("anthropic_api_key").unwrap().unwrap();
        assert!(encrypted);
        assert_ne!(stored, "sk-ant-12345");
    }

    #[tokio::test]
    async fn persisted_secret_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let cipher = Arc::new(SecretCipher::load_or_generate(dir.path()).unwrap());
        let store = Arc::new(Store::open_in_memory().unwrap());

        let config = ConfigRegistry::new(store.clone(), cipher.clone()).unwrap();
        config.set("anthropic_api_key", "sk-reload-test").unwrap();

        let reloaded = ConfigRegistry::new(store, cipher).unwrap();
        assert_eq!(
            reloaded.get("anthropic_api_key").as_deref(),
            Some("sk-reload-test")
        );
    }

    #[tokio::test]
    async fn callbacks_fire_once_per_distinct_change() {
        let config = registry();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired2 = fired.clone();
        config.subscribe(
            &["ollama_model"],
            Arc::new(move |key, old, new| {
                assert_eq!(key, "ollama_model");
                assert!(old.is_some());
                assert_eq!(new, "mistral");
                fired2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        config.set("ollama_model", "mistral").unwrap();
        // Same value again: no-op, no callback.
        config.set("ollama_model", "mistral").unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn callbacks_only_for_subscribed_keys() {
        let config = registry();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired2 = fired.clone();
        config.subscribe(
            &["claude_model"],
            Arc::new(move |_, _, _| {
                fired2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        config.set("persona_tone", "casual").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn set_many_is_atomic_and_notifies_each_change() {
        let config = registry();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        config.subscribe(
            &["host", "port"],
            Arc::new(move |_, _, _| {
                fired2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        config
            .set_many(&[
                ("host".into(), "0.0.0.0".into()),
                ("port".into(), "9090".into()),
            ])
            .unwrap();

        assert_eq!(config.get("host").as_deref(), Some("0.0.0.0"));
        assert_eq!(config.get_int("port"), Some(9090));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn set_many_rejects_all_on_one_invalid_entry() {
        let config = registry();
        let before = config.get("host");
        let result = config.set_many(&[
            ("host".into(), "10.0.0.1".into()),
            ("complexity_threshold".into(), "900".into()),
        ]);
        assert!(result.is_err());
        assert_eq!(config.get("host"), before);
    }

    #[tokio::test]
    async fn unknown_keys_pass_through() {
        let config = registry();
        config.set("custom_flag", "on").unwrap();
        assert_eq!(config.get("custom_flag").as_deref(), Some("on"));
    }

    #[tokio::test]
    async fn all_display_redacts_secrets() {
        let config = registry();
        config.set("anthropic_api_key", "sk-secret").unwrap();
        let entries = config.all_display();
        let (_, shown) = entries
            .iter()
            .find(|(k, _)| k == "anthropic_api_key")
            .unwrap();
        assert_eq!(shown, REDACTED);
    }
}
