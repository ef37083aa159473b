//! I/O 支持：JSON、RON 快照渲染以及 PNML 导出。
use std::fs;
use std::path::Path;

use ron::ser::PrettyConfig;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ron error: {0}")]
    Ron(#[from] ron::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn to_json_string<T>(value: &T) -> Result<String, IoError>
where
    T: Serialize,
{
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn from_json_str<T>(s: &str) -> Result<T, IoError>
where
    T: DeserializeOwned,
{
    Ok(serde_json::from_str(s)?)
}

pub fn to_ron_string<T>(value: &T) -> Result<String, IoError>
where
    T: Serialize,
{
    let mut pretty = PrettyConfig::default();
    pretty.new_line = "\n".into();
    Ok(ron::ser::to_string_pretty(value, pretty)?)
}

pub fn write_string<P: AsRef<Path>>(path: P, content: &str) -> Result<(), IoError> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, content)?;
    Ok(())
}

pub mod pnml {
    use std::fmt::Write as FmtWrite;

    use crate::net::core::Net;
    use crate::net::structure::Marking;

    /// 将网结构与当前标识写成 PNML 文档。
    ///
    /// `initialMarking` carries the *current* token count so that re-importing
    /// the document restores the state at export time. Nothing is validated.
    pub fn export_pnml(net: &Net, marking: &Marking) -> String {
        let mut doc = String::new();
        let _ = writeln!(&mut doc, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        let _ = writeln!(&mut doc, "<pnml>");
        let _ = writeln!(
            &mut doc,
            r#"  <net id="{}" type="P/T net">"#,
            escape_xml(&net.id)
        );
        let _ = writeln!(
            &mut doc,
            "    <name>\n      <text>{}</text>\n    </name>",
            escape_xml(&net.name)
        );

        for (place_id, place) in net.places() {
            let _ = writeln!(&mut doc, r#"    <place id="{}">"#, escape_xml(&place.id));
            let _ = writeln!(
                &mut doc,
                "      <name>\n        <text>{}</text>\n      </name>",
                escape_xml(&place.name)
            );
            let _ = writeln!(
                &mut doc,
                "      <initialMarking>\n        <text>{}</text>\n      </initialMarking>",
                marking.tokens(place_id)
            );
            let _ = writeln!(
                &mut doc,
                "      <graphics>\n        <position x=\"{}\" y=\"{}\"/>\n      </graphics>",
                place.position.x, place.position.y
            );
            let _ = writeln!(&mut doc, "    </place>");
        }

        for (_, transition) in net.transitions() {
            let _ = writeln!(
                &mut doc,
                r#"    <transition id="{}">"#,
                escape_xml(&transition.id)
            );
            let _ = writeln!(
                &mut doc,
                "      <name>\n        <text>{}</text>\n      </name>",
                escape_xml(&transition.name)
            );
            let _ = writeln!(
                &mut doc,
                "      <graphics>\n        <position x=\"{}\" y=\"{}\"/>\n      </graphics>",
                transition.position.x, transition.position.y
            );
            let _ = writeln!(&mut doc, "    </transition>");
        }

        for (_, arc) in net.arcs() {
            let _ = writeln!(
                &mut doc,
                r#"    <arc id="{}" source="{}" target="{}">"#,
                escape_xml(&arc.id),
                escape_xml(&arc.source),
                escape_xml(&arc.target)
            );
            let _ = writeln!(
                &mut doc,
                "      <inscription>\n        <text>{}</text>\n      </inscription>",
                arc.weight
            );
            let _ = writeln!(
                &mut doc,
                "      <type>\n        <text>{}</text>\n      </type>",
                arc.kind
            );
            let _ = writeln!(&mut doc, "    </arc>");
        }

        let _ = writeln!(&mut doc, "  </net>");
        let _ = write!(&mut doc, "</pnml>");
        doc
    }

    fn escape_xml(input: &str) -> String {
        let mut escaped = String::with_capacity(input.len());
        for ch in input.chars() {
            match ch {
                '&' => escaped.push_str("&amp;"),
                '<' => escaped.push_str("&lt;"),
                '>' => escaped.push_str("&gt;"),
                '"' => escaped.push_str("&quot;"),
                '\'' => escaped.push_str("&apos;"),
                _ => escaped.push(ch),
            }
        }
        escaped
    }

}
