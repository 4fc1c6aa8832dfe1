use uuid::Uuid;

use super::{PARTITION_TYPES, PartitionTypeInfo};

pub fn find_by_id(type_id: &str) -> Option<PartitionTypeInfo> {
    PARTITION_TYPES
        .iter()
        .find(|p| p.ty.eq_ignore_ascii_case(type_id))
        .cloned()
}

pub fn find_by_name(table_type: &str, name: &str) -> Option<PartitionTypeInfo> {
    PARTITION_TYPES
        .iter()
        .find(|p| p.table_type == table_type && p.name.eq_ignore_ascii_case(name))
        .cloned()
}

pub fn find_gpt_by_guid(guid: Uuid) -> Option<PartitionTypeInfo> {
    PARTITION_TYPES
        .iter()
        .filter(|p| p.table_type == "gpt")
        .find(|p| p.gpt_guid() == Some(guid))
        .cloned()
}

pub fn find_mbr_by_code(code: u8) -> Option<PartitionTypeInfo> {
    PARTITION_TYPES
        .iter()
        .filter(|p| p.table_type == "dos")
        .find(|p| p.mbr_code() == Some(code))
        .cloned()
}

pub fn all_for_table(table_type: &str) -> Vec<PartitionTypeInfo> {
    PARTITION_TYPES
        .iter()
        .filter(|p| p.table_type == table_type)
        .cloned()
        .collect()
}
