//! Configuration parameters struct parsing helper.

/// Composes a configuration struct from its default values, then overwrites
/// given fields by parsing from given TOML string if it's not `None`. Returns
/// an `Ok(config)` on success, and `Err(KeeperError)` on parser failure.
///
/// Example:
/// ```ignore
/// let config = parsed_config!(config_str => MyConfig; min_replicas, interval_ms)?;
/// ```
#[macro_export]
macro_rules! parsed_config {
    ($config_str:expr => $config_type:ty; $($field:ident),+) => {{
        let config_str: Option<&str> = $config_str;

        // closure helper for easier error returning
        let compose_config = || -> Result<$config_type, $crate::KeeperError> {
            let mut config: $config_type = Default::default();
            let config_str = match config_str {
                Some(s) => s,
                None => return Ok(config),
            };

            let mut table = config_str.parse::<toml::Table>()?;

            // traverse through all given field names
            $({
                // if field name found in table (and removed)
                if let Some(v) = table.remove(stringify!($field)) {
                    config.$field = v.try_into()?;
                }
            })+

            // if table is not empty at this time, some parsed keys are not
            // expected hence invalid
            if let Some(key) = table.keys().next() {
                return Err($crate::KeeperError::msg(format!(
                    "invalid field name '{}' in config",
                    key,
                )));
            }

            Ok(config)
        };

        compose_config()
    }};
}

#[cfg(test)]
mod config_tests {
    use crate::image::ImageConfig;
    use crate::partitioner::PartitionerConfig;
    use crate::replication::ReplicationMode;
    use crate::utils::KeeperError;

    #[test]
    fn parse_from_none() -> Result<(), KeeperError> {
        let config = parsed_config!(None => PartitionerConfig;
                                    replication_mode, min_replicas,
                                    interval_ms)?;
        assert_eq!(config.replication_mode, ReplicationMode::Mirroring);
        assert_eq!(config.min_replicas, 2);
        assert_eq!(config.interval_ms, 10000);
        Ok(())
    }

    #[test]
    fn parse_from_partial() -> Result<(), KeeperError> {
        let config_str = Some("replication_mode = 'MirroredSharding'\nmin_replicas = 3");
        let config = parsed_config!(config_str => PartitionerConfig;
                                    replication_mode, min_replicas,
                                    interval_ms)?;
        assert_eq!(config.replication_mode, ReplicationMode::MirroredSharding);
        assert_eq!(config.min_replicas, 3);
        assert_eq!(config.interval_ms, 10000);

        let config_str = Some("image_dir = '/tmp/partkeeper-cfg'");
        let config = parsed_config!(config_str => ImageConfig;
                                    image_dir, num_slots)?;
        assert_eq!(config.image_dir, "/tmp/partkeeper-cfg");
        assert_eq!(config.num_slots, 2);
        Ok(())
    }

    #[test]
    fn parse_invalid_field() {
        // a known field not listed for parsing is rejected as well
        let config_str = Some("interval_ms = 500");
        assert!(parsed_config!(config_str => PartitionerConfig;
                               min_replicas)
        .is_err());
        let config_str = Some("num_replicas = 3");
        assert!(parsed_config!(config_str => PartitionerConfig;
                               replication_mode, min_replicas, interval_ms)
        .is_err());
    }

    #[test]
    fn parse_wrong_type() {
        let config_str = Some("min_replicas = 'two'");
        assert!(parsed_config!(config_str => PartitionerConfig;
                               min_replicas)
        .is_err());
    }
}
