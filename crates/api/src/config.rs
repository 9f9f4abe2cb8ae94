//! Types for use when configuring tanuki modules.

use crate::*;

/// helper transcode function
fn tc<S: serde::Serialize, D: serde::de::DeserializeOwned>(
    s: &S,
) -> TnkResult<D> {
    serde_json::from_str(
        &serde_json::to_string(s)
            .map_err(|e| TnkError::other_src("encode", e))?,
    )
    .map_err(|e| TnkError::other_src("decode", e))
}

/// Denotes a type used to configure a specific tanuki module.
///
/// A module config is a struct with exactly one camelCase-named field
/// per module it configures, e.g. `{ "coreDispatch": { .. } }`. That
/// field name is the key the config is stored under.
///
/// Note, the types defined in this way are specifically for
/// configuration that cannot be changed at runtime, the likes of which
/// might be found in a configuration file.
///
/// It is highly recommended that you expose this struct in your module
/// docs to help devs using your module understand how to configure it.
pub trait ModConfig:
    'static
    + Sized
    + Default
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
{
}

/// Tanuki configuration.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Config(serde_json::Map<String, serde_json::Value>);

impl Config {
    /// Store a module config, overwriting any previous value for the
    /// same module key. Module factories call this to seed defaults
    /// when the builder assembles its config, and callers may call it
    /// again to override those defaults before the builder is frozen.
    pub fn set_module_config<M: ModConfig>(&mut self, m: &M) -> TnkResult<()> {
        match tc::<_, serde_json::Value>(m)? {
            serde_json::Value::Object(map) => {
                for (k, v) in map {
                    self.0.insert(k, v);
                }
                Ok(())
            }
            _ => Err(TnkError::other(
                "module config must serialize to an object",
            )),
        }
    }

    /// Extract a module config. Note that this config may be loaded
    /// from disk and edited by humans, so module config types should be
    /// tolerant to missing properties, setting sane defaults. Module
    /// keys that were never set resolve to the type's default.
    pub fn get_module_config<M: ModConfig>(&self) -> TnkResult<M> {
        let mut out = match tc::<_, serde_json::Value>(&M::default())? {
            serde_json::Value::Object(map) => map,
            _ => {
                return Err(TnkError::other(
                    "module config must serialize to an object",
                ))
            }
        };
        for (k, v) in out.iter_mut() {
            if let Some(set) = self.0.get(k) {
                *v = set.clone();
            }
        }
        tc(&serde_json::Value::Object(out))
    }
}
