//! GraphViz (DOT) rendering of a forest, for visual inspection of
//! sharing and ambiguity. Intermediate nodes come out box-shaped and
//! packed nodes as points, with the tree order preserved
//! (`ordering=out`).

use super::{Sppf, SppfId, SppfKind};
use crate::grammar::Grammar;
use crate::token::TokenBuf;
use hashbrown::HashSet;
use std::io::{self, Write};

/// Write the digraph of every node reachable from `root`.
pub fn write_dot_graph(
    sppf: &Sppf,
    root: SppfId,
    grammar: &Grammar,
    tokens: &TokenBuf,
    out: &mut dyn Write,
) -> io::Result<()> {
    writeln!(out, "digraph {{")?;
    writeln!(out, "    graph [ordering=out]")?;

    let mut visited: HashSet<SppfId, ahash::RandomState> = HashSet::default();
    write_dot_nodes(sppf, root, grammar, tokens, &mut visited, out)?;

    writeln!(out, "}}")
}

fn write_dot_nodes(
    sppf: &Sppf,
    id: SppfId,
    grammar: &Grammar,
    tokens: &TokenBuf,
    visited: &mut HashSet<SppfId, ahash::RandomState>,
    out: &mut dyn Write,
) -> io::Result<()> {
    if !visited.insert(id) {
        return Ok(());
    }

    write_dot_node(sppf, id, grammar, tokens, out)?;

    for &child in sppf.node(id).children() {
        write_dot_nodes(sppf, child, grammar, tokens, visited, out)?;
    }
    Ok(())
}

/// Write one node statement plus its outgoing edges.
pub fn write_dot_node(
    sppf: &Sppf,
    id: SppfId,
    grammar: &Grammar,
    tokens: &TokenBuf,
    out: &mut dyn Write,
) -> io::Result<()> {
    let node = sppf.node(id);
    write!(out, "    N{} [label=\"n{}", id.0, id.0)?;

    match node.kind() {
        SppfKind::Terminal => {
            write!(out, "\\n{} ", sppf.start_offset(id, tokens))?;
            if node.is_empty() {
                write!(out, "(empty)")?;
            } else {
                let spelling = tokens.get(node.last_token()).spelling();
                write!(out, "'{}'", escape(spelling))?;
            }
            write!(out, "\"")?;
        }
        SppfKind::NonTerminal => {
            let name = node
                .nonterminal_label()
                .map_or("?", |nt| grammar.name(nt));
            write!(out, "\\n{name}\\n")?;
            write_extent(sppf, id, tokens, out)?;
            write!(out, "\"")?;
        }
        SppfKind::Intermediate => {
            write!(out, "\\n")?;
            if let Some(slot) = node.slot() {
                let nt = grammar.rule_nonterminal(slot.rule);
                write!(
                    out,
                    "{}.{}[{}]",
                    grammar.name(nt),
                    grammar.rule_index(slot.rule),
                    slot.pos
                )?;
            } else {
                write!(out, "?")?;
            }
            write!(out, "\\n")?;
            write_extent(sppf, id, tokens, out)?;
            write!(out, "\";shape=box")?;
        }
        SppfKind::Packed => {
            write!(out, "\";shape=point")?;
        }
    }

    writeln!(out, "]")?;

    for &child in node.children() {
        write!(out, "    N{} -> N{}", id.0, child.0)?;
        if sppf.node(child).is_packed() {
            write!(out, " [headlabel=\"n{}\"]", child.0)?;
        }
        writeln!(out, ";")?;
    }
    Ok(())
}

fn write_extent(
    sppf: &Sppf,
    id: SppfId,
    tokens: &TokenBuf,
    out: &mut dyn Write,
) -> io::Result<()> {
    let node = sppf.node(id);
    if node.is_empty() {
        write!(out, "(empty @ {})", sppf.start_offset(id, tokens))
    } else {
        let first = tokens.get(node.first_token().unwrap_or(node.last_token()));
        let last = tokens.get(node.last_token());
        write!(
            out,
            "{} '{}' - {} '{}'",
            sppf.start_offset(id, tokens),
            escape(first.spelling()),
            sppf.end_offset(id, tokens),
            escape(last.spelling()),
        )
    }
}

fn escape(spelling: &str) -> String {
    spelling.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{Component, Grammar, Slot};
    use crate::token::{Token, TokenKind};

    const TOK_A: TokenKind = TokenKind::user(0);

    #[test]
    fn test_dot_output_shape() {
        let mut g = Grammar::new();
        let nt = g.nonterminal("expr");
        let rule = g
            .rule(nt, [Component::term(TOK_A), Component::term(TOK_A)])
            .unwrap();

        let mut tokens = TokenBuf::new();
        let mut t = Token::new();
        t.set_kind(TOK_A).set_spelling("a");
        let t0 = tokens.push(t.clone());
        t.set_offset(1);
        let t1 = tokens.push(t);

        let mut sppf = Sppf::new();
        let root = sppf.intern_nonterminal(nt, Some(t0), t1);
        let packed = sppf.new_packed(Slot { rule, pos: 1 }, t1, false);
        let left = sppf.get_node_t(t0);
        let right = sppf.get_node_t(t1);
        sppf.add_child(packed, left);
        sppf.add_child(packed, right);
        sppf.add_child(root, packed);

        let mut out = Vec::new();
        write_dot_graph(&sppf, root, &g, &tokens, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("digraph {"));
        assert!(text.contains("graph [ordering=out]"));
        assert!(text.contains("expr"));
        assert!(text.contains("shape=point"));
        assert!(text.contains(&format!("N{} -> N{}", root.0, packed.0)));
        assert!(text.trim_end().ends_with('}'));
    }
}
