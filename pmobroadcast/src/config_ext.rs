//! Extension pour intégrer la radio dans pmoconfig
//!
//! Ce module fournit le trait `BroadcastConfigExt` qui ajoute à
//! `pmoconfig::Config` la lecture de la section `radio` :
//!
//! ```yaml
//! radio:
//!   name: PMORadio
//!   playlist: radio.m3u          # relatif au répertoire de configuration
//!   mount: /stream
//!   content_type: audio/mpeg
//!   playback: loop               # ou once
//!   reload_playlist: true
//!   pacing:
//!     tick_ms: 250
//!     chunk_size: 4096
//!   listeners:
//!     queue_capacity: 100
//!   icy:
//!     enabled: false
//!     port: 42002
//!   decoder:
//!     strict_probe: false
//! ```
//!
//! # Auto-persist des valeurs par défaut
//!
//! Comme pour les autres extensions, les getters écrivent la valeur par
//! défaut dans la configuration quand la clé est absente.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use pmoconfig::Config;
use serde_yaml::{Number, Value};

use crate::options::{
    BroadcastOptions, DEFAULT_CHUNK_SIZE, DEFAULT_CONTENT_TYPE, DEFAULT_ICY_PORT, DEFAULT_MOUNT,
    DEFAULT_NAME, DEFAULT_QUEUE_CAPACITY, DEFAULT_TICK_MS,
};
use crate::playlist::PlaybackMode;

/// Trait d'extension pour la configuration de la station
pub trait BroadcastConfigExt {
    fn get_radio_name(&self) -> Result<String>;
    fn set_radio_name(&self, name: &str) -> Result<()>;

    /// Chemin de la playlist M3U, résolu par rapport au répertoire de
    /// configuration. `None` si aucune playlist n'est configurée.
    fn get_radio_playlist(&self) -> Result<Option<PathBuf>>;
    fn set_radio_playlist(&self, path: &str) -> Result<()>;

    fn get_radio_mount(&self) -> Result<String>;
    fn get_radio_content_type(&self) -> Result<String>;

    /// `loop` (défaut) ou `once`
    fn get_radio_playback(&self) -> Result<PlaybackMode>;
    fn get_radio_reload_playlist(&self) -> Result<bool>;

    // ========================================================================
    // Cadencement
    // ========================================================================

    fn get_radio_tick_ms(&self) -> Result<u64>;
    fn set_radio_tick_ms(&self, tick_ms: u64) -> Result<()>;
    fn get_radio_chunk_size(&self) -> Result<usize>;
    fn set_radio_chunk_size(&self, chunk_size: usize) -> Result<()>;

    /// Capacité de la file de chaque auditeur, en chunks
    fn get_radio_queue_capacity(&self) -> Result<usize>;

    // ========================================================================
    // ICY
    // ========================================================================

    fn get_radio_icy_enabled(&self) -> Result<bool>;
    fn set_radio_icy_enabled(&self, enabled: bool) -> Result<()>;
    fn get_radio_icy_port(&self) -> Result<u16>;
    fn set_radio_icy_port(&self, port: u16) -> Result<()>;

    fn get_radio_strict_probe(&self) -> Result<bool>;

    /// Assemble toutes les options de la station
    fn broadcast_options(&self) -> Result<BroadcastOptions>;
}

fn get_string(config: &Config, path: &[&str], default: &str) -> Result<String> {
    match config.get_value(path) {
        Ok(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        _ => {
            config.set_value(path, Value::String(default.to_string()))?;
            Ok(default.to_string())
        }
    }
}

fn get_bool(config: &Config, path: &[&str], default: bool) -> Result<bool> {
    match config.get_value(path) {
        Ok(Value::Bool(b)) => Ok(b),
        _ => {
            config.set_value(path, Value::Bool(default))?;
            Ok(default)
        }
    }
}

fn get_u64(config: &Config, path: &[&str], default: u64) -> Result<u64> {
    match config.get_value(path) {
        Ok(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| anyhow!("{} must be a positive integer, got {}", path.join("."), n)),
        Ok(Value::Null) | Err(_) => {
            config.set_value(path, Value::Number(Number::from(default)))?;
            Ok(default)
        }
        Ok(other) => Err(anyhow!(
            "{} must be a positive integer, got {:?}",
            path.join("."),
            other
        )),
    }
}

impl BroadcastConfigExt for Config {
    fn get_radio_name(&self) -> Result<String> {
        get_string(self, &["radio", "name"], DEFAULT_NAME)
    }

    fn set_radio_name(&self, name: &str) -> Result<()> {
        self.set_value(&["radio", "name"], Value::String(name.to_string()))
    }

    fn get_radio_playlist(&self) -> Result<Option<PathBuf>> {
        match self.get_value(&["radio", "playlist"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Ok(Some(self.resolve_path(s.trim()))),
            Ok(Value::String(_)) => Ok(None),
            _ => {
                self.set_value(&["radio", "playlist"], Value::String(String::new()))?;
                Ok(None)
            }
        }
    }

    fn set_radio_playlist(&self, path: &str) -> Result<()> {
        self.set_value(&["radio", "playlist"], Value::String(path.to_string()))
    }

    fn get_radio_mount(&self) -> Result<String> {
        get_string(self, &["radio", "mount"], DEFAULT_MOUNT)
    }

    fn get_radio_content_type(&self) -> Result<String> {
        get_string(self, &["radio", "content_type"], DEFAULT_CONTENT_TYPE)
    }

    fn get_radio_playback(&self) -> Result<PlaybackMode> {
        let raw = get_string(self, &["radio", "playback"], "loop")?;
        raw.parse()
            .map_err(|e| anyhow!("Invalid radio.playback '{}': {}", raw, e))
    }

    fn get_radio_reload_playlist(&self) -> Result<bool> {
        get_bool(self, &["radio", "reload_playlist"], true)
    }

    fn get_radio_tick_ms(&self) -> Result<u64> {
        get_u64(self, &["radio", "pacing", "tick_ms"], DEFAULT_TICK_MS)
    }

    fn set_radio_tick_ms(&self, tick_ms: u64) -> Result<()> {
        self.set_value(
            &["radio", "pacing", "tick_ms"],
            Value::Number(Number::from(tick_ms)),
        )
    }

    fn get_radio_chunk_size(&self) -> Result<usize> {
        Ok(get_u64(
            self,
            &["radio", "pacing", "chunk_size"],
            DEFAULT_CHUNK_SIZE as u64,
        )? as usize)
    }

    fn set_radio_chunk_size(&self, chunk_size: usize) -> Result<()> {
        self.set_value(
            &["radio", "pacing", "chunk_size"],
            Value::Number(Number::from(chunk_size)),
        )
    }

    fn get_radio_queue_capacity(&self) -> Result<usize> {
        Ok(get_u64(
            self,
            &["radio", "listeners", "queue_capacity"],
            DEFAULT_QUEUE_CAPACITY as u64,
        )? as usize)
    }

    fn get_radio_icy_enabled(&self) -> Result<bool> {
        get_bool(self, &["radio", "icy", "enabled"], false)
    }

    fn set_radio_icy_enabled(&self, enabled: bool) -> Result<()> {
        self.set_value(&["radio", "icy", "enabled"], Value::Bool(enabled))
    }

    fn get_radio_icy_port(&self) -> Result<u16> {
        let port = get_u64(self, &["radio", "icy", "port"], DEFAULT_ICY_PORT as u64)?;
        u16::try_from(port).map_err(|_| anyhow!("radio.icy.port {} out of range", port))
    }

    fn set_radio_icy_port(&self, port: u16) -> Result<()> {
        self.set_value(&["radio", "icy", "port"], Value::Number(Number::from(port)))
    }

    fn get_radio_strict_probe(&self) -> Result<bool> {
        get_bool(self, &["radio", "decoder", "strict_probe"], false)
    }

    fn broadcast_options(&self) -> Result<BroadcastOptions> {
        let options = BroadcastOptions {
            name: self.get_radio_name()?,
            playlist: self.get_radio_playlist()?,
            mount: self.get_radio_mount()?,
            content_type: self.get_radio_content_type()?,
            playback: self.get_radio_playback()?,
            reload_playlist: self.get_radio_reload_playlist()?,
            tick: Duration::from_millis(self.get_radio_tick_ms()?),
            chunk_size: self.get_radio_chunk_size()?,
            queue_capacity: self.get_radio_queue_capacity()?,
            icy_enabled: self.get_radio_icy_enabled()?,
            icy_port: self.get_radio_icy_port()?,
            strict_probe: self.get_radio_strict_probe()?,
        };
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Mapping;

    fn temp_config(yaml: Option<&str>) -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        if let Some(yaml) = yaml {
            std::fs::write(dir.path().join("config.yaml"), yaml).unwrap();
        }
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        (dir, config)
    }

    #[test]
    fn test_defaults() {
        let (_dir, config) = temp_config(None);
        let options = config.broadcast_options().unwrap();

        assert_eq!(options.name, "PMORadio");
        assert_eq!(options.playlist, None);
        assert_eq!(options.mount, "/stream");
        assert_eq!(options.playback, PlaybackMode::Loop);
        assert_eq!(options.tick, Duration::from_millis(250));
        assert_eq!(options.chunk_size, 4096);
        assert_eq!(options.queue_capacity, 100);
        assert!(!options.icy_enabled);
        assert_eq!(options.icy_port, 42002);
    }

    #[test]
    fn test_user_values_and_relative_playlist() {
        let (dir, config) = temp_config(Some(
            "radio:\n  name: Night FM\n  playlist: lists/night.m3u\n  playback: once\n  pacing:\n    tick_ms: 20\n",
        ));
        let options = config.broadcast_options().unwrap();

        assert_eq!(options.name, "Night FM");
        assert_eq!(
            options.playlist,
            Some(dir.path().join("lists/night.m3u"))
        );
        assert_eq!(options.playback, PlaybackMode::Once);
        assert_eq!(options.tick, Duration::from_millis(20));
        assert_eq!(options.chunk_size, 4096);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let (_dir, config) = temp_config(Some("radio:\n  playback: shuffle\n"));
        assert!(config.get_radio_playback().is_err());

        let (_dir, config) = temp_config(Some("radio:\n  icy:\n    port: 70000\n"));
        assert!(config.get_radio_icy_port().is_err());

        let (_dir, config) = temp_config(Some("radio:\n  pacing:\n    tick_ms: fast\n"));
        assert!(config.get_radio_tick_ms().is_err());
    }

    #[test]
    fn test_missing_keys_are_persisted() {
        let (_dir, config) = temp_config(Some("radio:\n  name: Solo\n"));
        config
            .set_value(&["radio", "icy"], Value::Mapping(Mapping::new()))
            .unwrap();

        assert_eq!(config.get_radio_icy_port().unwrap(), 42002);
        assert_eq!(
            config.get_value(&["radio", "icy", "port"]).unwrap(),
            Value::Number(Number::from(42002u64))
        );

        config.set_radio_icy_enabled(true).unwrap();
        let reloaded = Config::load_config(config.directory()).unwrap();
        assert!(reloaded.get_radio_icy_enabled().unwrap());
    }
}
