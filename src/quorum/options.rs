// Option strings follow the block layer's flat `key=value,key=value`
// convention, with the ordered child list spelled as `children.0=...`,
// `children.1=...` and so on.

use hashbrown::HashMap;

use super::{
    config::{QuorumOptions, ReadPattern},
    error::ConfigError,
};

/// The result of parsing an option string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOptions {
    pub options: QuorumOptions,
    /// Child descriptors in index order.
    pub children: Vec<String>,
}

pub fn parse(input: &str) -> Result<ParsedOptions, ConfigError> {
    let mut threshold = None;
    let mut read_pattern = None;
    let mut blkverify = false;
    let mut rewrite_corrupted = false;
    let mut children = HashMap::new();

    for pair in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            ConfigError::InvalidValue {
                key: pair.into(),
                value: String::new(),
            }
        })?;
        match key {
            "vote-threshold" => {
                threshold = Some(value.parse::<u32>().map_err(|_| {
                    ConfigError::InvalidValue {
                        key: key.into(),
                        value: value.into(),
                    }
                })?)
            }
            "read-pattern" => {
                read_pattern = Some(value.parse::<ReadPattern>()?)
            }
            "blkverify" => blkverify = parse_bool(key, value)?,
            "rewrite-corrupted" => rewrite_corrupted = parse_bool(key, value)?,
            _ => match key.strip_prefix("children.") {
                Some(index) => {
                    let index = index.parse::<usize>().map_err(|_| {
                        ConfigError::UnknownOption(key.into())
                    })?;
                    children.insert(index, value.to_string());
                }
                None => Err(ConfigError::UnknownOption(key.into()))?,
            },
        }
    }

    let threshold =
        threshold.ok_or(ConfigError::MissingOption("vote-threshold"))?;
    let children = (0..children.len())
        .map(|i| children.remove(&i).ok_or(ConfigError::MissingChild(i)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ParsedOptions {
        options: QuorumOptions::builder()
            .vote_threshold(threshold)
            .read_pattern(read_pattern.unwrap_or_default())
            .blkverify(blkverify)
            .rewrite_corrupted(rewrite_corrupted)
            .build(),
        children,
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.into(),
            value: value.into(),
        }),
    }
}
