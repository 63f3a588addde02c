//! Require discovery visitor that finds every `require("...")` call with a
//! literal argument in a CommonJS module, wherever it appears.
//!
//! Modules are parsed as scripts (top-level `return` allowed, as inside the
//! CommonJS function wrapper), so text inside comments, strings, templates
//! and regular expressions never looks like a call.

use log::debug;
use oxc_allocator::Allocator;
use oxc_ast::ast::{Argument, CallExpression, Expression};
use oxc_ast_visit::{Visit, walk};
use oxc_parser::{ParseOptions, Parser};
use oxc_span::SourceType;

/// A `require` call discovered in module source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredRequire {
    /// The literal argument with escapes decoded, e.g. `./lib/cloud`
    pub specifier: String,
    /// 1-based line of the call
    pub line: usize,
}

/// Collect all literal `require` calls in source order.
///
/// Fails with the parser's diagnostics when the source is not valid
/// JavaScript.
pub fn discover_requires(source: &str) -> Result<Vec<DiscoveredRequire>, String> {
    let allocator = Allocator::default();
    let options = ParseOptions {
        allow_return_outside_function: true,
        ..ParseOptions::default()
    };
    let parsed = Parser::new(&allocator, source, SourceType::cjs())
        .with_options(options)
        .parse();

    if parsed.panicked || !parsed.errors.is_empty() {
        let messages: Vec<String> = parsed.errors.iter().map(ToString::to_string).collect();
        return Err(if messages.is_empty() {
            "source could not be parsed".to_owned()
        } else {
            messages.join("; ")
        });
    }

    let mut collector = RequireCollector {
        source,
        requires: Vec::new(),
    };
    collector.visit_program(&parsed.program);
    Ok(collector.requires)
}

struct RequireCollector<'s> {
    source: &'s str,
    requires: Vec<DiscoveredRequire>,
}

impl RequireCollector<'_> {
    fn line_at(&self, offset: u32) -> usize {
        let offset = (offset as usize).min(self.source.len());
        self.source
            .get(..offset)
            .map_or(1, |before| before.matches('\n').count() + 1)
    }
}

impl<'a> Visit<'a> for RequireCollector<'_> {
    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        let is_require = matches!(
            &call.callee,
            Expression::Identifier(ident) if ident.name.as_str() == "require"
        );

        if is_require {
            let line = self.line_at(call.span.start);
            match call.arguments.first().and_then(literal_specifier) {
                Some(specifier) => self.requires.push(DiscoveredRequire { specifier, line }),
                None => debug!(
                    "Ignoring require() with a non-literal argument at line {}",
                    line
                ),
            }
        }

        walk::walk_call_expression(self, call);
    }
}

/// `'./x'`, `"./x"` or a template literal without substitutions
fn literal_specifier(argument: &Argument<'_>) -> Option<String> {
    match argument {
        Argument::StringLiteral(literal) => Some(literal.value.as_str().to_owned()),
        Argument::TemplateLiteral(template) if template.expressions.is_empty() => template
            .quasis
            .first()
            .and_then(|quasi| quasi.value.cooked.as_ref())
            .map(|cooked| cooked.as_str().to_owned()),
        _ => None,
    }
}
