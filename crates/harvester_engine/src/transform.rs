//! Transform programs applied to harvested items.
//!
//! A [`TransformCompiler`] turns a [`TransformSource`] into a
//! [`CompiledTransform`], which is expensive to build and reusable. Each
//! translation then takes a fresh [`Transformer`] from it, binds parameters
//! and runs once.

use std::collections::BTreeSet;
use std::error::Error as StdError;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use thiserror::Error;

/// Where a transform program comes from. Also the per-worker cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransformSource {
    File(PathBuf),
    Inline { name: String, text: String },
}

impl TransformSource {
    pub fn name(&self) -> String {
        match self {
            TransformSource::File(path) => path.display().to_string(),
            TransformSource::Inline { name, .. } => name.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("cannot load transform {name}: {cause}")]
    Load {
        name: String,
        #[source]
        cause: io::Error,
    },
    #[error("invalid transform {name}: {message}")]
    Compile { name: String, message: String },
    #[error("parameter {parameter} is not declared by transform {name}")]
    UnknownParameter { name: String, parameter: String },
    #[error("cannot read transform input: {0}")]
    Input(#[source] io::Error),
    #[error("transform failed: {0}")]
    Failed(String),
}

impl TransformError {
    /// Whether a missing file is anywhere in the cause chain.
    pub fn is_file_not_found(&self) -> bool {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(io_err) = err.downcast_ref::<io::Error>() {
                if io_err.kind() == io::ErrorKind::NotFound {
                    return true;
                }
            }
            current = err.source();
        }
        false
    }
}

pub trait TransformCompiler: Send + Sync {
    fn compile(&self, source: &TransformSource) -> Result<Box<dyn CompiledTransform>, TransformError>;
}

pub trait CompiledTransform: Send {
    fn new_transformer(&self) -> Box<dyn Transformer + '_>;
}

pub trait Transformer {
    /// Rejected parameters leave the transformer usable.
    fn set_parameter(&mut self, name: &str, value: &str) -> Result<(), TransformError>;

    fn transform(&mut self, input: &mut dyn Read) -> Result<Vec<u8>, TransformError>;
}

/// Text templates with `${name}` placeholders.
///
/// `${item}` expands to the input document, without its XML declaration. Every
/// other placeholder is a parameter; unset parameters expand to nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateTransformCompiler;

const ITEM_PLACEHOLDER: &str = "item";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

#[derive(Debug)]
struct CompiledTemplate {
    name: String,
    segments: Vec<Segment>,
    parameters: BTreeSet<String>,
}

struct TemplateTransformer<'a> {
    template: &'a CompiledTemplate,
    values: Vec<(String, String)>,
}

impl TransformCompiler for TemplateTransformCompiler {
    fn compile(&self, source: &TransformSource) -> Result<Box<dyn CompiledTransform>, TransformError> {
        let name = source.name();
        let text = match source {
            TransformSource::File(path) => fs::read_to_string(path).map_err(|cause| TransformError::Load {
                name: name.clone(),
                cause,
            })?,
            TransformSource::Inline { text, .. } => text.clone(),
        };
        let segments = parse_template(&text).map_err(|message| TransformError::Compile {
            name: name.clone(),
            message,
        })?;
        let parameters = segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Placeholder(p) if p != ITEM_PLACEHOLDER => Some(p.clone()),
                _ => None,
            })
            .collect();
        Ok(Box::new(CompiledTemplate {
            name,
            segments,
            parameters,
        }))
    }
}

fn parse_template(text: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        if start > 0 {
            segments.push(Segment::Literal(rest[..start].to_string()));
        }
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("unterminated placeholder at byte {}", text.len() - rest.len() + start))?;
        let name = after[..end].trim();
        if name.is_empty() {
            return Err("empty placeholder".to_string());
        }
        segments.push(Segment::Placeholder(name.to_string()));
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

impl CompiledTransform for CompiledTemplate {
    fn new_transformer(&self) -> Box<dyn Transformer + '_> {
        Box::new(TemplateTransformer {
            template: self,
            values: Vec::new(),
        })
    }
}

impl Transformer for TemplateTransformer<'_> {
    fn set_parameter(&mut self, name: &str, value: &str) -> Result<(), TransformError> {
        if !self.template.parameters.contains(name) {
            return Err(TransformError::UnknownParameter {
                name: self.template.name.clone(),
                parameter: name.to_string(),
            });
        }
        self.values.retain(|(existing, _)| existing != name);
        self.values.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn transform(&mut self, input: &mut dyn Read) -> Result<Vec<u8>, TransformError> {
        let mut raw = Vec::new();
        input.read_to_end(&mut raw).map_err(TransformError::Input)?;
        let document = String::from_utf8(raw)
            .map_err(|err| TransformError::Failed(format!("input is not UTF-8: {err}")))?;
        let item = strip_declaration(&document);

        let mut out = String::with_capacity(document.len() + 256);
        for segment in &self.template.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) if name == ITEM_PLACEHOLDER => out.push_str(item),
                Segment::Placeholder(name) => {
                    if let Some((_, value)) = self.values.iter().find(|(n, _)| n == name) {
                        out.push_str(value);
                    }
                }
            }
        }
        Ok(out.into_bytes())
    }
}

fn strip_declaration(document: &str) -> &str {
    let trimmed = document.trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return trimmed[end + 2..].trim_start();
        }
    }
    trimmed
}
