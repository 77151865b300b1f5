//! Typed builder for FFmpeg `-filter_complex` graphs
//!
//! Stages stay as values until the graph is rendered, so numeric parameters
//! never pass through hand-written format strings and label wiring is checked
//! before FFmpeg ever sees it.

use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Problems found while validating a graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("filter graph has no chains")]
    Empty,
    #[error("chain {0} has no stages")]
    EmptyChain(usize),
    #[error("chain {0} has no output label")]
    MissingOutput(usize),
    #[error("label [{0}] is used before it is produced")]
    UnknownLabel(String),
    #[error("label [{0}] is consumed more than once")]
    LabelReused(String),
    #[error("label [{0}] is produced more than once")]
    DuplicateLabel(String),
    #[error("label [{0}] is produced but never consumed")]
    Dangling(String),
    #[error("split into {expected} streams but chain declares {actual} outputs")]
    SplitMismatch { expected: usize, actual: usize },
    #[error("overlay needs exactly two inputs, chain {chain} has {actual}")]
    OverlayInputs { chain: usize, actual: usize },
}

/// One side of a `scale` target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dim {
    Px(u32),
    /// Follow the source aspect ratio, rounded to an even number
    KeepAspect,
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Px(v) => write!(f, "{}", v),
            Dim::KeepAspect => write!(f, "-2"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectFit {
    /// Grow until the box is covered
    Increase,
}

impl AspectFit {
    fn as_str(&self) -> &'static str {
        match self {
            AspectFit::Increase => "increase",
        }
    }
}

/// Placement of an overlaid stream or text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Px(u32),
    Center,
}

/// A single filter in a chain
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Scale {
        width: Dim,
        height: Dim,
        fit: Option<AspectFit>,
    },
    /// Offsets of `None` let FFmpeg center the crop
    Crop {
        width: u32,
        height: u32,
        x: Option<u32>,
        y: Option<u32>,
    },
    Blur {
        sigma: f32,
    },
    /// Centered pad to a fixed canvas
    Pad {
        width: u32,
        height: u32,
        color: String,
    },
    Overlay {
        x: Position,
        y: Position,
    },
    Split {
        outputs: usize,
    },
    SetSar,
    /// Horizontally centered text burned into the frame
    DrawText {
        text: String,
        fontfile: Option<String>,
        size: u32,
        y: Position,
        /// Semi-transparent box behind the text
        boxed: bool,
    },
}

fn escape_with(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape a filter option value for both parsing levels: the option parser
/// (`\`, `'` and `:`) and then the graph parser (`\`, `'`, `,`, `;`, `[`, `]`).
pub fn escape_option_value(value: &str) -> String {
    let option_level = escape_with(value, &['\\', '\'', ':']);
    escape_with(&option_level, &['\\', '\'', ',', ';', '[', ']'])
}

fn render_position(pos: &Position, centered: &str) -> String {
    match pos {
        Position::Px(v) => v.to_string(),
        Position::Center => centered.to_string(),
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Scale { width, height, fit } => {
                write!(f, "scale={}:{}", width, height)?;
                if let Some(fit) = fit {
                    write!(f, ":force_original_aspect_ratio={}", fit.as_str())?;
                }
                Ok(())
            }
            Stage::Crop {
                width,
                height,
                x,
                y,
            } => match (x, y) {
                (Some(x), Some(y)) => write!(f, "crop={}:{}:{}:{}", width, height, x, y),
                (Some(x), None) => write!(f, "crop={}:{}:{}", width, height, x),
                _ => write!(f, "crop={}:{}", width, height),
            },
            Stage::Blur { sigma } => write!(f, "gblur=sigma={}", sigma),
            Stage::Pad {
                width,
                height,
                color,
            } => write!(
                f,
                "pad={}:{}:(ow-iw)/2:(oh-ih)/2:{}",
                width,
                height,
                escape_option_value(color)
            ),
            Stage::Overlay { x, y } => write!(
                f,
                "overlay={}:{}",
                render_position(x, "(W-w)/2"),
                render_position(y, "(H-h)/2")
            ),
            Stage::Split { outputs } => write!(f, "split={}", outputs),
            Stage::SetSar => write!(f, "setsar=1"),
            Stage::DrawText {
                text,
                fontfile,
                size,
                y,
                boxed,
            } => {
                write!(f, "drawtext=")?;
                if let Some(font) = fontfile {
                    write!(f, "fontfile={}:", escape_option_value(font))?;
                }
                write!(
                    f,
                    "text={}:expansion=none:fontsize={}:fontcolor=white:x=(w-text_w)/2:y={}:\
                     shadowcolor=black@0.6:shadowx=2:shadowy=2",
                    escape_option_value(text),
                    size,
                    render_position(y, "(h-text_h)/2")
                )?;
                if *boxed {
                    write!(f, ":box=1:boxcolor=black@0.4:boxborderw=10")?;
                }
                Ok(())
            }
        }
    }
}

/// Linear run of stages between labelled pads
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChain {
    inputs: Vec<String>,
    stages: Vec<Stage>,
    outputs: Vec<String>,
}

impl FilterChain {
    /// Start a chain reading from `input` (a stream specifier like `0:v` or a label)
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            inputs: vec![input.into()],
            stages: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Add another input pad
    pub fn input(mut self, label: impl Into<String>) -> Self {
        self.inputs.push(label.into());
        self
    }

    pub fn then(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Name an output pad
    pub fn to(mut self, label: impl Into<String>) -> Self {
        self.outputs.push(label.into());
        self
    }

}

impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for input in &self.inputs {
            write!(f, "[{}]", input)?;
        }
        let stages: Vec<String> = self.stages.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", stages.join(","))?;
        for output in &self.outputs {
            write!(f, "[{}]", output)?;
        }
        Ok(())
    }
}

/// Stream specifiers (`0:v`, `1:a`) refer to demuxed inputs, not graph labels
fn is_stream_specifier(label: &str) -> bool {
    label.chars().next().is_some_and(|c| c.is_ascii_digit())
}

#[derive(Debug, Default)]
pub struct FilterGraphBuilder {
    chains: Vec<FilterChain>,
}

impl FilterGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chain(mut self, chain: FilterChain) -> Self {
        self.chains.push(chain);
        self
    }

    /// Validate label wiring and produce a renderable graph.
    ///
    /// The first output of the last chain becomes the graph output.
    pub fn build(self) -> Result<FilterGraph, GraphError> {
        if self.chains.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut produced: HashSet<String> = HashSet::new();
        let mut consumed: HashSet<String> = HashSet::new();

        for (index, chain) in self.chains.iter().enumerate() {
            if chain.stages.is_empty() {
                return Err(GraphError::EmptyChain(index));
            }
            if chain.outputs.is_empty() {
                return Err(GraphError::MissingOutput(index));
            }

            for input in &chain.inputs {
                if is_stream_specifier(input) {
                    continue;
                }
                if !produced.contains(input) {
                    return Err(GraphError::UnknownLabel(input.clone()));
                }
                if !consumed.insert(input.clone()) {
                    return Err(GraphError::LabelReused(input.clone()));
                }
            }

            if let Some(Stage::Overlay { .. }) = chain.stages.first() {
                if chain.inputs.len() != 2 {
                    return Err(GraphError::OverlayInputs {
                        chain: index,
                        actual: chain.inputs.len(),
                    });
                }
            }

            if let Some(Stage::Split { outputs }) = chain.stages.last() {
                if *outputs != chain.outputs.len() {
                    return Err(GraphError::SplitMismatch {
                        expected: *outputs,
                        actual: chain.outputs.len(),
                    });
                }
            }

            for output in &chain.outputs {
                if !produced.insert(output.clone()) {
                    return Err(GraphError::DuplicateLabel(output.clone()));
                }
            }
        }

        let last = self.chains.len() - 1;
        for (index, chain) in self.chains.iter().enumerate() {
            if index == last {
                continue;
            }
            if let Some(label) = chain.outputs.iter().find(|l| !consumed.contains(*l)) {
                return Err(GraphError::Dangling(label.clone()));
            }
        }

        let output = self.chains[last].outputs[0].clone();
        Ok(FilterGraph {
            chains: self.chains,
            output,
        })
    }
}

/// Validated filter graph, rendered with `to_string()`
#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    chains: Vec<FilterChain>,
    output: String,
}

impl FilterGraph {
    /// `-map` argument for the graph output
    pub fn map_arg(&self) -> String {
        format!("[{}]", self.output)
    }

    /// Append a stage to the chain that produces the graph output. Labels
    /// are untouched, so the graph stays valid.
    pub fn append(mut self, stage: Stage) -> Self {
        if let Some(last) = self.chains.last_mut() {
            last.stages.push(stage);
        }
        self
    }
}

#[cfg(test)]
impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Scale { .. } => "scale",
            Stage::Crop { .. } => "crop",
            Stage::Blur { .. } => "gblur",
            Stage::Pad { .. } => "pad",
            Stage::Overlay { .. } => "overlay",
            Stage::Split { .. } => "split",
            Stage::SetSar => "setsar",
            Stage::DrawText { .. } => "drawtext",
        }
    }
}

#[cfg(test)]
impl FilterGraph {
    /// Number of stages using the given FFmpeg filter
    pub fn count(&self, filter: &str) -> usize {
        self.chains
            .iter()
            .flat_map(|c| c.stages.iter())
            .filter(|s| s.name() == filter)
            .count()
    }

    pub fn has_blur(&self) -> bool {
        self.count("gblur") > 0
    }
}

impl fmt::Display for FilterGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chains: Vec<String> = self.chains.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", chains.join(";"))
    }
}
