//! Turning application failures into the message shown to the user.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::{
    error::{ApplicationError, GeneratedPosition},
    sourcemap::Mappings,
};

/// The position table and original source that came with the currently
/// loaded application code.
#[derive(Debug, Clone, Default)]
pub struct SourceContext {
    pub mappings: Option<Mappings>,
    pub source: String,
}

/// Map a generated position (1-based) to the trimmed text of the original
/// source line it came from.
pub fn original_line<'a>(
    position: GeneratedPosition,
    mappings: &Mappings,
    source: &'a str,
) -> Option<&'a str> {
    let line = (position.line as usize).checked_sub(1)?;
    let column = position.column.saturating_sub(1);
    let original = mappings.lookup(line, column)?;
    source
        .lines()
        .nth(original.line as usize)
        .map(str::trim)
}

/// Render a failure the way it is shown to the user.
pub fn render(error: &ApplicationError, context: Option<&SourceContext>) -> String {
    let located = error.position.zip(context).and_then(|(position, context)| {
        let mappings = context.mappings.as_ref()?;
        original_line(position, mappings, &context.source)
    });
    if let Some(line) = located {
        return format!("Error: {} at \n{}", error.message, line);
    }
    match error.args.as_deref() {
        Some([first, ..]) => match first {
            Value::String(s) => format!("Error: {}", s),
            other => format!("Error: {}", other),
        },
        _ => format!("Error: {}", error.message),
    }
}

/// Holds the [`SourceContext`] of the loaded code; swapped on every
/// `set_app_code`.
#[derive(Default)]
pub struct ExceptionTranslator {
    context: RwLock<Option<Arc<SourceContext>>>,
}

impl ExceptionTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_source(&self, context: SourceContext) {
        *self.context.write() = Some(Arc::new(context));
    }

    pub fn translate(&self, error: &ApplicationError) -> String {
        let context = self.context.read().clone();
        render(error, context.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SOURCE: &str = "def reduce(state, action):\n    count = state['count']\n    return count / 0\n";

    fn context() -> SourceContext {
        SourceContext {
            // generated line 1 -> original line 0, generated line 2 -> 1, line 3 -> 2
            mappings: Some(Mappings::parse("AAAA;AACA;AACA").unwrap()),
            source: SOURCE.to_string(),
        }
    }

    #[test]
    fn test_located_message() {
        let error = ApplicationError::new("division by zero").at(3, 12);
        assert_eq!(
            render(&error, Some(&context())),
            "Error: division by zero at \nreturn count / 0"
        );
    }

    #[test]
    fn test_raw_message_without_mapping() {
        let error = ApplicationError::new("division by zero").at(3, 12);
        assert_eq!(render(&error, None), "Error: division by zero");

        let no_map = SourceContext {
            mappings: None,
            source: SOURCE.to_string(),
        };
        assert_eq!(render(&error, Some(&no_map)), "Error: division by zero");
    }

    #[test]
    fn test_nested_args() {
        let error = ApplicationError::new("PythonError")
            .with_args(vec![json!("name 'x' is not defined")]);
        assert_eq!(render(&error, Some(&context())), "Error: name 'x' is not defined");

        let error = ApplicationError::new("PythonError").with_args(vec![json!(42)]);
        assert_eq!(render(&error, None), "Error: 42");
    }

    #[test]
    fn test_position_past_source_falls_back() {
        let ctx = SourceContext {
            mappings: Some(Mappings::parse("AAAA;AAEA").unwrap()),
            source: "only one line".to_string(),
        };
        let error = ApplicationError::new("boom").at(2, 1);
        assert_eq!(render(&error, Some(&ctx)), "Error: boom");
    }

    #[test]
    fn test_translator_swaps_context() {
        let translator = ExceptionTranslator::new();
        let error = ApplicationError::new("boom").at(2, 1);
        assert_eq!(translator.translate(&error), "Error: boom");
        translator.set_source(context());
        assert_eq!(
            translator.translate(&error),
            "Error: boom at \ncount = state['count']"
        );
    }
}
