//! Scripting bridge
//!
//! The console can only run code and print text. [`MetricsBridge`] injects a
//! collector function once, under a randomized name so restarts against a
//! long-running server never clash with an earlier definition, then calls it
//! and decodes the JSON it prints into a [`Snapshot`].

use crate::client::RemoteConsole;
use crate::error::{FerrumError, Result};
use crate::sample::{Sample, CONSUMED_PREFIX, PRODUCED_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Script template; the placeholder name is replaced at injection
const SCRIPT_TEMPLATE: &str = include_str!("../scripts/collect_metrics.lua");

/// Function name used in the template
const TEMPLATE_FUNCTION: &str = "collect_metrics";

/// Marker the server puts in front of script errors
const ERROR_MARKER: &str = "Error:";

/// Command prefix running its argument as a Lua chunk
const SCRIPT_COMMAND: &str = "/sc ";

/// One raw collection result
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Whether the game was paused
    #[serde(default)]
    pub paused: bool,
    /// Game tick of the reading
    pub game_tick: u64,
    /// Cumulative consumption per item
    #[serde(default)]
    pub items_consumed: BTreeMap<String, i64>,
    /// Cumulative production per item
    #[serde(default)]
    pub items_produced: BTreeMap<String, i64>,
}

impl Snapshot {
    /// Flatten into a sample: `in_<item>` for consumed, `out_<item>` for
    /// produced
    pub fn into_sample(self) -> Sample {
        let consumed = self
            .items_consumed
            .into_iter()
            .map(|(item, value)| (format!("{}{}", CONSUMED_PREFIX, item), value));
        let produced = self
            .items_produced
            .into_iter()
            .map(|(item, value)| (format!("{}{}", PRODUCED_PREFIX, item), value));
        Sample::new(self.game_tick, consumed.chain(produced).collect())
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tick {}{}, consumed <{} pairs>, produced <{} pairs>",
            self.game_tick,
            if self.paused { " (paused)" } else { "" },
            self.items_consumed.len(),
            self.items_produced.len()
        )
    }
}

/// Turns the console's "run code, print text" primitive into snapshots
#[derive(Debug)]
pub struct MetricsBridge<C> {
    console: C,
    function_name: String,
    loaded: Mutex<bool>,
}

impl<C: RemoteConsole> MetricsBridge<C> {
    /// Create a bridge with a freshly generated function name
    pub fn new(console: C) -> Self {
        let function_name = format!("{}_{:032x}", TEMPLATE_FUNCTION, rand::random::<u128>());
        Self {
            console,
            function_name,
            loaded: Mutex::new(false),
        }
    }

    /// The console this bridge talks through
    pub fn console(&self) -> &C {
        &self.console
    }

    /// Name the collector function is injected under
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Whether the script has been injected
    pub fn is_loaded(&self) -> bool {
        *self.lock_loaded()
    }

    /// Inject the collector script unless already done
    ///
    /// Concurrent callers wait for one injection instead of each sending the
    /// script. A failure leaves the bridge unloaded; the next call tries again.
    pub fn ensure_script_loaded(&self) -> Result<()> {
        let mut loaded = self.lock_loaded();
        if *loaded {
            return Ok(());
        }

        let script = SCRIPT_TEMPLATE.replace(TEMPLATE_FUNCTION, &self.function_name);
        self.run(&format!("{}{}", SCRIPT_COMMAND, script))?;
        *loaded = true;
        log::info!("Injected collector script as {}", self.function_name);
        Ok(())
    }

    /// Read the current counters from the server
    pub fn collect(&self) -> Result<Snapshot> {
        self.ensure_script_loaded()?;
        let reply = self.run(&format!(
            "{}rcon.print({}())",
            SCRIPT_COMMAND, self.function_name
        ))?;
        let snapshot: Snapshot =
            serde_json::from_str(reply.trim()).map_err(FerrumError::MalformedReply)?;
        log::debug!("Collected {}", snapshot);
        Ok(snapshot)
    }

    fn lock_loaded(&self) -> MutexGuard<'_, bool> {
        self.loaded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn run(&self, command: &str) -> Result<String> {
        let reply = self.console.send_command(command)?;
        match reply.find(ERROR_MARKER) {
            Some(idx) => Err(FerrumError::Script {
                message: reply[idx + ERROR_MARKER.len()..].trim().to_string(),
            }),
            None => Ok(reply),
        }
    }
}
