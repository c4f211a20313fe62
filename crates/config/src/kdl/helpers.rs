//! Small accessors over KDL nodes.
//!
//! Settings are written as child nodes with a single positional argument:
//! `port 9084`. Lookups take the first child with the given name.

use ::kdl::{KdlNode, KdlValue};

/// First child node named `name`
pub fn child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|c| c.name().value() == name)
}

/// First positional argument of a node
pub fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

pub fn get_first_arg_string(node: &KdlNode) -> Option<String> {
    first_arg(node)?.as_string().map(str::to_string)
}

pub fn get_first_arg_int(node: &KdlNode) -> Option<i128> {
    first_arg(node)?.as_integer()
}

pub fn get_first_arg_bool(node: &KdlNode) -> Option<bool> {
    first_arg(node)?.as_bool()
}

pub fn get_string_entry(node: &KdlNode, name: &str) -> Option<String> {
    child(node, name).and_then(get_first_arg_string)
}

pub fn get_int_entry(node: &KdlNode, name: &str) -> Option<i128> {
    child(node, name).and_then(get_first_arg_int)
}

pub fn get_bool_entry(node: &KdlNode, name: &str) -> Option<bool> {
    child(node, name).and_then(get_first_arg_bool)
}

/// Integer setting that must fit a port number
pub fn get_port_entry(node: &KdlNode, name: &str) -> anyhow::Result<Option<u16>> {
    match get_int_entry(node, name) {
        None => Ok(None),
        Some(v) => u16::try_from(v)
            .map(Some)
            .map_err(|_| anyhow::anyhow!("'{}' must be a port number (0-65535), got {}", name, v)),
    }
}

/// Non-negative integer setting
pub fn get_u64_entry(node: &KdlNode, name: &str) -> anyhow::Result<Option<u64>> {
    match get_int_entry(node, name) {
        None => Ok(None),
        Some(v) => u64::try_from(v)
            .map(Some)
            .map_err(|_| anyhow::anyhow!("'{}' must be a non-negative integer, got {}", name, v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::kdl::KdlDocument;

    fn node(src: &str) -> KdlNode {
        let doc: KdlDocument = src.parse().unwrap();
        doc.nodes()[0].clone()
    }

    #[test]
    fn test_entry_lookups() {
        let n = node(r#"proxy { http-port 8080; binary "/bin/x"; enabled #true }"#);
        assert_eq!(get_int_entry(&n, "http-port"), Some(8080));
        assert_eq!(get_string_entry(&n, "binary").as_deref(), Some("/bin/x"));
        assert_eq!(get_bool_entry(&n, "enabled"), Some(true));
        assert_eq!(get_string_entry(&n, "missing"), None);
    }

    #[test]
    fn test_port_out_of_range() {
        let n = node("proxy { http-port 70000 }");
        assert!(get_port_entry(&n, "http-port").is_err());
    }

    #[test]
    fn test_first_arg_string() {
        let n = node(r#"runtime "8.4" { port 9084 }"#);
        assert_eq!(get_first_arg_string(&n).as_deref(), Some("8.4"));
    }
}
