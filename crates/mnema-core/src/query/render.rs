//! Deterministic graph-to-prose rendering
//!
//! Two sections, entities then relationships, sorted so the same graph
//! always renders to the same text. This rendering feeds both the
//! explanation query types and the chat-model graph summary.

use crate::memory::{display_name, ScoredTriple};
use crate::text::Lang;

/// Render scored triples as readable prose in `lang`.
pub fn render_graph(triples: &[ScoredTriple], lang: Lang) -> String {
    let (entity_header, relation_header, empty_note) = match lang {
        Lang::En => (
            "# entity info",
            "# relationships between entities",
            "(no graph data)",
        ),
        Lang::Ja => ("# エンティティ情報", "# エンティティ間の関係", "（グラフ情報なし）"),
    };

    if triples.is_empty() {
        return empty_note.to_string();
    }

    // entities: name (type), deduped and sorted
    let mut entities: Vec<(String, String)> = Vec::new();
    for scored in triples {
        for node in [&scored.triple.source, &scored.triple.target] {
            let name = display_name(&node.id, &node.memory_group).to_string();
            let entry = (name, node.node_type.clone());
            if !entities.contains(&entry) {
                entities.push(entry);
            }
        }
    }
    entities.sort();

    let mut lines: Vec<(String, f64)> = triples
        .iter()
        .map(|scored| {
            let src = display_name(&scored.triple.edge.source_id, &scored.triple.edge.memory_group);
            let tgt = display_name(&scored.triple.edge.target_id, &scored.triple.edge.memory_group);
            (
                format!(
                    "- {src} -[{}]-> {tgt} ({:.3})",
                    scored.triple.edge.edge_type, scored.thickness
                ),
                scored.thickness,
            )
        })
        .collect();
    lines.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    let mut out = String::new();
    out.push_str(entity_header);
    out.push('\n');
    for (name, node_type) in &entities {
        out.push_str(&format!("- {name} ({node_type})\n"));
    }
    out.push('\n');
    out.push_str(relation_header);
    out.push('\n');
    for (line, _) in lines {
        out.push_str(&line);
        out.push('\n');
    }
    out
}
