use std::{fs, path};

use crate::{Error, ErrorKind, Result};

macro_rules! config_field {
    ($table:ident, $field:ident, $config:ident, $($args:tt)+) => {{
        let field = stringify!($field);
        if let Some(val) = $table.get(field) {
            $config.$field = match val.$($args)+.map(|v| v.parse()) {
                Some(Ok(v)) => v,
                Some(Err(_)) | None => err!(
                    InvalidInput,
                    desc: "invalid config field {}, {}", field, val.to_string()
                )?,
            }
        }
    }};
}

/// Endpoint configuration.
#[derive(Clone)]
pub struct Config {
    /// Human readable name for the endpoint, used as prefix in log lines.
    /// * **Default**: "meshmq"
    /// * **Mutable**: No
    pub name: String,

    /// Whether inbound peer traffic is forwarded to other peers. When false,
    /// inbound messages are only delivered to local subscribers and stores.
    /// * **Default**: [Config::DEF_FORWARD]
    /// * **Mutable**: No
    pub forward: bool,

    /// Initial hop budget stamped on locally published messages. Forwarders
    /// decrement it once per hop and drop the message when it reaches zero.
    /// * **Default**: [Config::DEF_TTL]
    /// * **Mutable**: No
    pub ttl: u16,

    /// When set to an existing directory, every locally published message is
    /// recorded to `messages.dat` under it. Empty string disables recording.
    /// * **Default**: ""
    /// * **Mutable**: No
    pub recording_directory: String,

    /// Maximum number of records written to the recording file before the
    /// sink is closed. Further publishes proceed without recording.
    /// * **Default**: [Config::DEF_OUTPUT_GENERATOR_FILE_CAP]
    /// * **Mutable**: No
    pub output_generator_file_cap: u64,

    /// Messages are drained from the fan-out buffers in batches, so that all
    /// paths get evenly processed. This parameter bounds the batch size.
    /// * **Default**: [Config::DEF_MSG_BATCH_SIZE]
    /// * **Mutable**: No
    pub msg_batch_size: u32,

    /// Initial credit, in elements, granted to every outbound path. Consumers
    /// return credit as they acknowledge batches.
    /// * **Default**: [Config::DEF_PATH_CREDIT]
    /// * **Mutable**: No
    pub path_credit: u32,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            name: "meshmq".to_string(),
            forward: Self::DEF_FORWARD,
            ttl: Self::DEF_TTL,
            recording_directory: String::default(),
            output_generator_file_cap: Self::DEF_OUTPUT_GENERATOR_FILE_CAP,
            msg_batch_size: Self::DEF_MSG_BATCH_SIZE,
            path_credit: Self::DEF_PATH_CREDIT,
        }
    }
}

impl TryFrom<toml::Value> for Config {
    type Error = Error;

    fn try_from(val: toml::Value) -> Result<Config> {
        let mut def = Config::default();
        match val.as_table() {
            Some(t) => {
                config_field!(t, name, def, as_str());
                config_field!(t, forward, def, as_bool().map(|b| b.to_string()));
                config_field!(t, ttl, def, as_integer().map(|n| n.to_string()));
                config_field!(t, recording_directory, def, as_str());
                config_field!(
                    t,
                    output_generator_file_cap,
                    def,
                    as_integer().map(|n| n.to_string())
                );
                config_field!(
                    t,
                    msg_batch_size,
                    def,
                    as_integer().map(|n| n.to_string())
                );
                config_field!(t, path_credit, def, as_integer().map(|n| n.to_string()));
            }
            None => (),
        };

        Ok(def)
    }
}

impl Config {
    /// Refer to [Config::forward]
    pub const DEF_FORWARD: bool = true;
    /// Refer to [Config::ttl]
    pub const DEF_TTL: u16 = 20;
    /// Refer to [Config::output_generator_file_cap]
    pub const DEF_OUTPUT_GENERATOR_FILE_CAP: u64 = 10_000;
    /// Refer to [Config::msg_batch_size]
    pub const DEF_MSG_BATCH_SIZE: u32 = 1024;
    /// Refer to [Config::path_credit]
    pub const DEF_PATH_CREDIT: u32 = 128;

    /// Construct a new configuration from a file located by `loc`.
    pub fn from_file<P>(loc: P) -> Result<Config>
    where
        P: AsRef<path::Path>,
    {
        use std::str::from_utf8;

        let ploc: &path::Path = loc.as_ref();

        let data = err!(IOError, try: fs::read(ploc), "reading config from {:?}", ploc)?;
        let s = err!(InvalidInput, try: from_utf8(&data), "config not utf8 {:?}", ploc)?;

        let val: toml::Value =
            err!(InvalidInput, try: toml::from_str(s), "config not toml {:?}", ploc)?;

        Config::try_from(val)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl == 0 {
            err!(InvalidInput, desc: "ttl can't be ZERO")
        } else if self.msg_batch_size == 0 {
            err!(InvalidInput, desc: "msg_batch_size can't be ZERO")
        } else if self.path_credit == 0 {
            err!(InvalidInput, desc: "path_credit can't be ZERO")
        } else {
            Ok(())
        }
    }
}
