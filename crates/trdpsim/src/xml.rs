// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! XML configuration loader.
//!
//! Accepts the TRDP XML dialects seen in the field: `dataset`/`DataSet`
//! elements anywhere in the tree, telegram-carrying elements whose tag
//! contains `PD`/`MD` or is literally `telegram`/`comId`, and a tolerant
//! set of attribute alias spellings. Unknown field types map to raw
//! bytes; telegrams referencing unregistered datasets are skipped with a
//! warning so one bad entry does not sink the whole document.

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use roxmltree::{Document, Node};

use crate::error::{Error, Result};
use crate::model::{DatasetDef, Direction, FieldDef, FieldType, TelegramDef, TelegramType};
use crate::registry::TelegramRegistry;

/// Load `path` and populate `registry` with its datasets and telegrams.
pub fn load_document(path: &Path, registry: &TelegramRegistry) -> Result<()> {
    let text = fs::read_to_string(path).map_err(|e| {
        Error::ConfigInvalid(format!("failed to read {}: {}", path.display(), e))
    })?;
    load_str(&text, registry)
}

/// Parse XML `text` and populate `registry`.
pub fn load_str(text: &str, registry: &TelegramRegistry) -> Result<()> {
    let doc = Document::parse(text)
        .map_err(|e| Error::ConfigInvalid(format!("failed to parse XML: {}", e)))?;

    let root = doc.root_element();

    let mut dataset_count = 0usize;
    for node in root.descendants().filter(|n| n.is_element()) {
        if !is_dataset_element(&node) {
            continue;
        }
        if let Some(dataset) = parse_dataset(&node) {
            registry.register_dataset(dataset);
            dataset_count += 1;
        }
    }

    let mut telegram_count = 0usize;
    for node in root.descendants().filter(|n| n.is_element()) {
        if !is_telegram_element(&node) {
            continue;
        }
        let Some(telegram) = parse_telegram(&node) else {
            continue;
        };
        let com_id = telegram.com_id;
        match registry.register_telegram(telegram) {
            Ok(()) => telegram_count += 1,
            Err(err) => {
                log::warn!("[XML] Skipping telegram with ComId {}: {}", com_id, err);
            }
        }
    }

    log::info!(
        "[XML] Loaded {} dataset(s), {} telegram(s)",
        dataset_count,
        telegram_count
    );
    Ok(())
}

fn is_dataset_element(node: &Node) -> bool {
    node.tag_name().name().eq_ignore_ascii_case("dataset")
}

fn is_telegram_element(node: &Node) -> bool {
    let name = node.tag_name().name().to_ascii_lowercase();
    if name == "telegram" || name == "comid" {
        return true;
    }
    // Dialects name these md-pd / mdTelegram / ProcessDataPD etc.
    !is_dataset_element(node) && (name.contains("pd") || name.contains("md"))
}

/// Case-insensitive attribute lookup over a list of alias spellings.
fn attr_ci<'a>(node: &'a Node, aliases: &[&str]) -> Option<&'a str> {
    for alias in aliases {
        if let Some(attr) = node
            .attributes()
            .find(|a| a.name().eq_ignore_ascii_case(alias))
        {
            return Some(attr.value());
        }
    }
    None
}

fn attr_usize(node: &Node, aliases: &[&str], fallback: usize) -> usize {
    attr_ci(node, aliases)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(fallback)
}

fn attr_millis(node: &Node, aliases: &[&str]) -> Duration {
    Duration::from_millis(
        attr_ci(node, aliases)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0),
    )
}

fn attr_ip(node: &Node, aliases: &[&str]) -> Ipv4Addr {
    attr_ci(node, aliases)
        .and_then(|v| v.trim().parse::<Ipv4Addr>().ok())
        .unwrap_or(Ipv4Addr::UNSPECIFIED)
}

fn parse_dataset(node: &Node) -> Option<DatasetDef> {
    let name = attr_ci(node, &["name"])
        .or_else(|| attr_ci(node, &["id"]))?
        .to_string();
    if name.is_empty() {
        return None;
    }

    let mut dataset = DatasetDef::new(name);
    dataset.size = attr_usize(node, &["size"], 0);

    for field_node in node.children().filter(|n| n.is_element()) {
        let Some(field_name) = attr_ci(&field_node, &["name"]) else {
            continue;
        };

        let ty = attr_ci(&field_node, &["type"])
            .map(FieldType::parse)
            .unwrap_or(FieldType::Bytes);
        let mut field = FieldDef::new(field_name, ty, 0);
        field.offset = attr_usize(&field_node, &["offset"], 0);
        field.size = attr_usize(&field_node, &["size"], 0);
        field.bit_offset = attr_usize(&field_node, &["bitoffs", "bitoffset"], 0);
        field.array_length = attr_usize(&field_node, &["array", "arraysize"], 1).max(1);

        dataset.fields.push(field);
    }

    Some(dataset)
}

fn parse_com_id(node: &Node) -> Option<u32> {
    if let Some(value) = attr_ci(node, &["comid", "id"]) {
        if let Ok(parsed) = value.trim().parse::<u32>() {
            return Some(parsed);
        }
    }
    node.children()
        .filter(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case("comid"))
        .find_map(|n| n.text().and_then(|t| t.trim().parse::<u32>().ok()))
}

fn parse_dataset_ref(node: &Node) -> Option<String> {
    if let Some(value) = attr_ci(node, &["dataset", "datasetname", "dsname", "datasetref"]) {
        return Some(value.to_string());
    }
    node.children()
        .filter(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case("dataset"))
        .find_map(|n| n.text().map(|t| t.trim().to_string()))
}

fn parse_direction(node: &Node) -> Direction {
    let raw = attr_ci(node, &["dir"]).or_else(|| attr_ci(node, &["direction"]));
    match raw.map(str::to_ascii_uppercase).as_deref() {
        Some("RX") | Some("SUB") | Some("IN") | Some("INPUT") => Direction::Rx,
        _ => Direction::Tx,
    }
}

fn parse_telegram_type(node: &Node) -> TelegramType {
    let tag = node.tag_name().name().to_ascii_uppercase();
    if tag.contains("PD") {
        return TelegramType::Pd;
    }
    if tag.contains("MD") {
        return TelegramType::Md;
    }
    match attr_ci(node, &["type"]).map(str::to_ascii_uppercase) {
        Some(ty) if ty.contains("MD") => TelegramType::Md,
        _ => TelegramType::Pd,
    }
}

fn parse_telegram(node: &Node) -> Option<TelegramDef> {
    let com_id = parse_com_id(node)?;
    let dataset_name = parse_dataset_ref(node)?;

    let name = attr_ci(node, &["name"])
        .or_else(|| attr_ci(node, &["comment"]))
        .map(str::to_string)
        .unwrap_or_else(|| format!("ComId{}", com_id));

    let mut telegram = TelegramDef::new(
        com_id,
        name,
        dataset_name,
        parse_direction(node),
        parse_telegram_type(node),
    );

    telegram.src_ip = attr_ip(node, &["srcip", "src-ip", "sourceip"]);
    telegram.dest_ip = attr_ip(node, &["destip", "dest-ip", "dstip"]);
    telegram.src_port = attr_usize(node, &["srcport"], 0) as u16;
    telegram.dest_port = attr_usize(node, &["destport"], 0) as u16;
    telegram.ttl = attr_usize(node, &["ttl"], 64) as u8;
    telegram.qos = attr_usize(node, &["qos"], 0) as u8;
    telegram.trdp_flags = attr_usize(node, &["flags", "trdpflags"], 0) as u32;
    telegram.cycle = attr_millis(node, &["cycle", "interval"]);
    telegram.expected_replies = attr_usize(node, &["expectedreplies", "replies"], 0) as u32;
    telegram.reply_timeout = attr_millis(node, &["replytimeout"]);
    telegram.confirm_timeout = attr_millis(node, &["confirmtimeout"]);

    Some(telegram)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(xml: &str) -> TelegramRegistry {
        let registry = TelegramRegistry::new();
        load_str(xml, &registry).expect("valid XML should load");
        registry
    }

    #[test]
    fn test_load_datasets_and_telegrams() {
        let registry = load(
            r#"<?xml version="1.0"?>
<device>
  <bus-interface-list>
    <dataSet name="doors" size="0">
      <element name="open" type="BOOL" offset="0"/>
      <element name="count" type="UINT16" offset="1"/>
      <element name="label" type="STRING" offset="3" size="8"/>
    </dataSet>
    <telegram comId="1001" dataset="doors" dir="Tx" name="DoorsOut" cycle="100"/>
    <pd comid="1002" datasetRef="doors" direction="SUB"/>
  </bus-interface-list>
</device>"#,
        );

        let ds = registry.dataset_copy("doors").expect("dataset");
        assert_eq!(ds.fields.len(), 3);
        assert_eq!(ds.effective_size(), 11);

        let tx = registry.telegram_copy(1001).expect("telegram 1001");
        assert_eq!(tx.name, "DoorsOut");
        assert_eq!(tx.direction, Direction::Tx);
        assert_eq!(tx.ty, TelegramType::Pd);
        assert_eq!(tx.cycle, Duration::from_millis(100));

        let rx = registry.telegram_copy(1002).expect("telegram 1002");
        assert_eq!(rx.direction, Direction::Rx);
        assert_eq!(rx.name, "ComId1002");
    }

    #[test]
    fn test_md_attributes() {
        let registry = load(
            r#"<cfg>
  <dataset name="cmd"><f name="op" type="U8" offset="0"/></dataset>
  <mdTelegram comId="300" dsName="cmd" expectedReplies="2"
              replyTimeout="500" confirmTimeout="0"/>
</cfg>"#,
        );

        let md = registry.telegram_copy(300).expect("telegram 300");
        assert_eq!(md.ty, TelegramType::Md);
        assert_eq!(md.expected_replies, 2);
        assert_eq!(md.reply_timeout, Duration::from_millis(500));
        assert_eq!(md.confirm_timeout, Duration::ZERO);
    }

    #[test]
    fn test_unknown_dataset_reference_is_skipped() {
        let registry = load(
            r#"<cfg>
  <dataset name="known"><f name="x" type="U8" offset="0"/></dataset>
  <telegram comId="1" dataset="known"/>
  <telegram comId="2" dataset="ghost"/>
</cfg>"#,
        );

        assert!(registry.telegram_copy(1).is_some());
        assert!(registry.telegram_copy(2).is_none());
    }

    #[test]
    fn test_comid_child_element_and_ips() {
        let registry = load(
            r#"<cfg>
  <DataSet id="d"><f name="x" type="UINT32" offset="0" array="2" bitoffs="3"/></DataSet>
  <Telegram dataset="d" srcIp="10.0.0.1" destIp="239.1.1.1" srcPort="20000" destPort="20001" ttl="5">
    <comId>77</comId>
  </Telegram>
</cfg>"#,
        );

        let t = registry.telegram_copy(77).expect("telegram 77");
        assert_eq!(t.src_ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(t.dest_ip, Ipv4Addr::new(239, 1, 1, 1));
        assert_eq!(t.src_port, 20000);
        assert_eq!(t.dest_port, 20001);
        assert_eq!(t.ttl, 5);

        let ds = registry.dataset_copy("d").expect("dataset");
        assert_eq!(ds.fields[0].array_length, 2);
        assert_eq!(ds.fields[0].bit_offset, 3);
    }

    #[test]
    fn test_unknown_type_maps_to_bytes() {
        let registry = load(
            r#"<cfg><dataset name="d">
  <f name="stamp" type="TIMEDATE48" offset="0" size="6"/>
</dataset></cfg>"#,
        );
        let ds = registry.dataset_copy("d").expect("dataset");
        assert_eq!(ds.fields[0].ty, FieldType::Bytes);
        assert_eq!(ds.fields[0].width(), 6);
    }

    #[test]
    fn test_invalid_xml_is_an_error() {
        let registry = TelegramRegistry::new();
        let err = load_str("<unclosed", &registry).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write as _;

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"<cfg><dataset name="d"><f name="x" type="U8" offset="0"/></dataset>
<telegram comId="5" dataset="d"/></cfg>"#
        )
        .expect("write XML");

        let registry = TelegramRegistry::new();
        registry.load_from_xml(file.path()).expect("load");
        assert!(registry.telegram_copy(5).is_some());

        // A failed reload leaves the registry empty.
        assert!(registry.load_from_xml("/nonexistent/trdp.xml").is_err());
        assert!(registry.list_telegrams().is_empty());
    }
}
