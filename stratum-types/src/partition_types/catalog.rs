use super::PartitionTypeInfo;
use serde::Deserialize;

// Load TOML data at compile time
const GPT_TOML: &str = include_str!("../../resources/types/gpt_types.toml");
const DOS_TOML: &str = include_str!("../../resources/types/dos_types.toml");

#[derive(Deserialize)]
struct PartitionTypeCatalog {
    types: Vec<PartitionTypeInfo>,
}

pub static PARTITION_TYPES: std::sync::LazyLock<Vec<PartitionTypeInfo>> =
    std::sync::LazyLock::new(|| {
        let mut all_types = Vec::new();

        if let Ok(gpt) = toml::from_str::<PartitionTypeCatalog>(GPT_TOML) {
            all_types.extend(gpt.types);
        }

        if let Ok(dos) = toml::from_str::<PartitionTypeCatalog>(DOS_TOML) {
            all_types.extend(dos.types);
        }

        all_types
    });

pub static COMMON_GPT_TYPES: std::sync::LazyLock<Vec<PartitionTypeInfo>> =
    std::sync::LazyLock::new(|| {
        PARTITION_TYPES
            .iter()
            .filter(|p| p.table_type == "gpt")
            .cloned()
            .collect()
    });

pub static COMMON_DOS_TYPES: std::sync::LazyLock<Vec<PartitionTypeInfo>> =
    std::sync::LazyLock::new(|| {
        PARTITION_TYPES
            .iter()
            .filter(|p| p.table_type == "dos")
            .cloned()
            .collect()
    });
