use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ast;
use crate::error::Error;
use crate::eval::blocks::BlockLayer;
use crate::optimizer::{self, FilterFolder};
use crate::parser::{self, CompileOptions};
use crate::utils::AutoEscape;

/// The compiled form of a template.
///
/// A program is the optimized statement tree plus the block table:
/// every `{% block %}` is independently callable for inheritance and
/// `self` references.  Programs serialize so that compiled templates
/// can be persisted by a [`CompiledTemplateCache`](crate::bytecode::CompiledTemplateCache).
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Program {
    pub root: Vec<ast::Stmt>,
    pub blocks: BTreeMap<String, BlockLayer>,
}

/// A named template in its compiled form.
#[derive(Debug)]
pub(crate) struct CompiledTemplate {
    pub name: String,
    pub source: String,
    pub program: Program,
    pub initial_auto_escape: AutoEscape,
}

impl CompiledTemplate {
    /// Parses, optimizes and lowers a template.
    pub fn new(
        name: &str,
        source: String,
        options: &CompileOptions,
        initial_auto_escape: AutoEscape,
        filter_folder: &FilterFolder<'_>,
    ) -> Result<CompiledTemplate, Error> {
        let mut stmt = parser::parse(&source, name, options)?;
        optimizer::optimize(&mut stmt, filter_folder);
        let root = match stmt {
            ast::Stmt::Template(tmpl) => tmpl.into_inner().children,
            _ => unreachable!("parser always returns a template"),
        };
        let mut blocks = BTreeMap::new();
        collect_blocks(&root, &mut blocks);
        Ok(CompiledTemplate {
            name: name.to_string(),
            source,
            program: Program { root, blocks },
            initial_auto_escape,
        })
    }
}

fn collect_blocks(stmts: &[ast::Stmt], blocks: &mut BTreeMap<String, BlockLayer>) {
    for stmt in stmts {
        match stmt {
            ast::Stmt::Block(node) => {
                blocks.insert(
                    node.name.clone(),
                    BlockLayer {
                        body: node.body.clone(),
                        scoped: node.scoped,
                        required: node.required,
                    },
                );
                collect_blocks(&node.body, blocks);
            }
            ast::Stmt::ForLoop(node) => {
                collect_blocks(&node.body, blocks);
                collect_blocks(&node.else_body, blocks);
            }
            ast::Stmt::IfCond(node) => {
                collect_blocks(&node.true_body, blocks);
                collect_blocks(&node.false_body, blocks);
            }
            ast::Stmt::WithBlock(node) => collect_blocks(&node.body, blocks),
            ast::Stmt::AutoEscape(node) => collect_blocks(&node.body, blocks),
            ast::Stmt::FilterBlock(node) => collect_blocks(&node.body, blocks),
            ast::Stmt::SetBlock(node) => collect_blocks(&node.body, blocks),
            _ => {}
        }
    }
}

