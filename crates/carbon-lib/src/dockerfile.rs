//! Container image optimisation
//!
//! Works on Dockerfile text that was read upstream. The analysis looks for
//! the usual causes of oversized images (fat base images, many layers,
//! package caches left behind) and proposes optimisations, each with an
//! estimated CO2 reduction for building, storing and shipping the image.
//! Optimisations marked automatic can be written back into the text.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Summed reductions are never reported above this
pub const MAX_REDUCTION_PERCENT: f64 = 80.0;
pub const BASE_IMAGE_REDUCTION_PERCENT: f64 = 25.0;
pub const MULTI_STAGE_REDUCTION_PERCENT: f64 = 40.0;
pub const LAYER_REDUCTION_PERCENT: f64 = 15.0;
pub const COPY_ORDERING_REDUCTION_PERCENT: f64 = 10.0;
pub const PACKAGE_CACHE_REDUCTION_PERCENT: f64 = 5.0;

const MB_PER_LAYER: f64 = 10.0;
const DEFAULT_BASE_IMAGE_MB: f64 = 100.0;
const MULTI_STAGE_SIZE_THRESHOLD_MB: f64 = 500.0;
const LAYER_REDUCTION_THRESHOLD: usize = 10;
const MIN_TARGET_LAYERS: usize = 5;
const RUN_COMBINE_THRESHOLD: usize = 3;

const APT_CLEANUP: &str = "rm -rf /var/lib/apt/lists/*";
const YUM_CLEANUP: &str = "yum clean all";

const LAYER_INSTRUCTIONS: &[&str] = &["RUN", "COPY", "ADD", "WORKDIR", "USER", "VOLUME", "EXPOSE"];
const BUILD_TOOL_KEYWORDS: &[&str] = &["gcc", "make", "build", "compile"];

/// Smaller drop-in replacements for common base images
const BASE_IMAGE_ALTERNATIVES: &[(&str, &str)] = &[
    ("ubuntu:latest", "ubuntu:22.04-slim"),
    ("ubuntu:20.04", "ubuntu:20.04-slim"),
    ("ubuntu:18.04", "ubuntu:18.04-slim"),
    ("debian:latest", "debian:bullseye-slim"),
    ("debian:bullseye", "debian:bullseye-slim"),
    ("python:latest", "python:3.11-slim"),
    ("python:3.11", "python:3.11-slim"),
    ("python:3.10", "python:3.10-slim"),
    ("python:3.9", "python:3.9-slim"),
    ("node:latest", "node:18-alpine"),
    ("node:18", "node:18-alpine"),
    ("node:16", "node:16-alpine"),
    ("openjdk:latest", "openjdk:17-jre-slim"),
    ("openjdk:17", "openjdk:17-jre-slim"),
    ("openjdk:11", "openjdk:11-jre-slim"),
    ("nginx:latest", "nginx:alpine"),
    ("redis:latest", "redis:alpine"),
    ("postgres:latest", "postgres:alpine"),
];

/// Approximate MB per image family: full, slim and alpine variants
const BASE_IMAGE_SIZES_MB: &[(&str, f64, Option<f64>, Option<f64>)] = &[
    ("ubuntu", 72.0, Some(28.0), None),
    ("debian", 124.0, Some(69.0), None),
    ("python", 885.0, Some(122.0), Some(45.0)),
    ("node", 993.0, None, Some(110.0)),
    ("alpine", 5.0, None, None),
    ("scratch", 0.0, None, None),
];

pub fn alternative_for(image: &str) -> Option<&'static str> {
    let image = image.to_ascii_lowercase();
    BASE_IMAGE_ALTERNATIVES
        .iter()
        .find(|(from, _)| *from == image)
        .map(|(_, to)| *to)
}

/// Estimated size of a base image from its family and tag variant
pub fn base_image_size_mb(image: &str) -> f64 {
    let image = image.to_ascii_lowercase();
    let (name, tag) = image.split_once(':').unwrap_or((image.as_str(), ""));
    let family = name.rsplit('/').next().unwrap_or(name);

    BASE_IMAGE_SIZES_MB
        .iter()
        .find(|(f, ..)| *f == family)
        .map(|&(_, full, slim, alpine)| {
            let variant = if tag.contains("alpine") {
                alpine
            } else if tag.contains("slim") {
                slim
            } else {
                None
            };
            variant.unwrap_or(full)
        })
        .unwrap_or(DEFAULT_BASE_IMAGE_MB)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationStrategy {
    Size,
    Layers,
    Cache,
    #[default]
    All,
}

impl OptimizationStrategy {
    fn includes(&self, group: Self) -> bool {
        *self == Self::All || *self == group
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Layers => "layers",
            Self::Cache => "cache",
            Self::All => "all",
        }
    }
}

impl fmt::Display for OptimizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "size" => Ok(Self::Size),
            "layers" => Ok(Self::Layers),
            "cache" => Ok(Self::Cache),
            "all" => Ok(Self::All),
            other => Err(EngineError::invalid_input(
                "strategy",
                other,
                "expected size, layers, cache or all",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationKind {
    BaseImage,
    MultiStage,
    LayerReduction,
    CopyOrdering,
    PackageCache,
}

impl OptimizationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BaseImage => "base_image",
            Self::MultiStage => "multi_stage",
            Self::LayerReduction => "layer_reduction",
            Self::CopyOrdering => "copy_ordering",
            Self::PackageCache => "package_cache",
        }
    }
}

impl fmt::Display for OptimizationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerfileIssue {
    /// First physical line of the instruction, 1-based
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerfileAnalysis {
    pub total_lines: usize,
    pub instructions: usize,
    pub layer_count: usize,
    pub run_instructions: usize,
    pub copy_instructions: usize,
    pub stages: usize,
    /// Image of the final stage
    pub base_image: Option<String>,
    /// RUN instructions that install packages and leave the cache behind
    pub uncleaned_package_installs: usize,
    pub copies_whole_context: bool,
    pub estimated_size_mb: f64,
    pub issues: Vec<DockerfileIssue>,
    pub opportunities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optimization {
    pub kind: OptimizationKind,
    pub description: String,
    pub impact: ImpactLevel,
    pub co2_reduction_percent: f64,
    /// Can be written back into the Dockerfile without review
    pub auto_apply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Optimization {
    fn new(
        kind: OptimizationKind,
        description: impl Into<String>,
        impact: ImpactLevel,
        co2_reduction_percent: f64,
        auto_apply: bool,
    ) -> Self {
        Self {
            kind,
            description: description.into(),
            impact,
            co2_reduction_percent,
            auto_apply,
            original: None,
            replacement: None,
            details: None,
        }
    }

    fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub strategy: OptimizationStrategy,
    pub analysis: DockerfileAnalysis,
    /// Highest reduction first
    pub optimizations: Vec<Optimization>,
    pub estimated_reduction_percent: f64,
}

/// Analyse `content` and propose optimisations for `strategy`
pub fn optimize(content: &str, strategy: OptimizationStrategy) -> OptimizationReport {
    let analysis = analyze(content);
    let optimizations = generate_optimizations(&analysis, strategy);
    let estimated = estimate_savings(&optimizations);

    debug!(
        strategy = %strategy,
        layers = analysis.layer_count,
        issues = analysis.issues.len(),
        optimizations = optimizations.len(),
        reduction_percent = estimated,
        "Analysed Dockerfile"
    );

    OptimizationReport {
        strategy,
        analysis,
        optimizations,
        estimated_reduction_percent: estimated,
    }
}

/// Additive estimate, capped at [`MAX_REDUCTION_PERCENT`]
pub fn estimate_savings(optimizations: &[Optimization]) -> f64 {
    optimizations
        .iter()
        .map(|o| o.co2_reduction_percent)
        .sum::<f64>()
        .min(MAX_REDUCTION_PERCENT)
}

pub fn analyze(content: &str) -> DockerfileAnalysis {
    let entries = parse(content);
    let mut analysis = DockerfileAnalysis {
        total_lines: content.trim().lines().count(),
        ..Default::default()
    };
    let mut build_tools = false;
    let mut previous_was_run = false;

    for entry in &entries {
        let inst = match entry {
            Entry::Instruction(inst) => inst,
            Entry::Verbatim(_) => {
                previous_was_run = false;
                continue;
            }
        };
        analysis.instructions += 1;
        if LAYER_INSTRUCTIONS.contains(&inst.keyword.as_str()) {
            analysis.layer_count += 1;
        }

        match inst.keyword.as_str() {
            "FROM" => {
                analysis.stages += 1;
                if let Some(image) = from_image(&inst.args) {
                    if let Some(alternative) = alternative_for(image) {
                        analysis.issues.push(DockerfileIssue {
                            line: inst.line,
                            message: format!("Consider using {alternative} instead of {image}"),
                        });
                    }
                    analysis.base_image = Some(image.to_string());
                }
            }
            "RUN" => {
                analysis.run_instructions += 1;
                let lower = inst.args.to_ascii_lowercase();
                build_tools |= BUILD_TOOL_KEYWORDS.iter().any(|k| lower.contains(k));
                if run_issues(inst, previous_was_run, &mut analysis.issues) {
                    analysis.uncleaned_package_installs += 1;
                }
            }
            "COPY" | "ADD" => {
                analysis.copy_instructions += 1;
                if copies_whole_context(&inst.args) {
                    analysis.copies_whole_context = true;
                    analysis.issues.push(DockerfileIssue {
                        line: inst.line,
                        message: "Avoid copying the entire build context, name the files needed".into(),
                    });
                }
            }
            _ => {}
        }
        previous_was_run = inst.keyword == "RUN";
    }

    if analysis.run_instructions > RUN_COMBINE_THRESHOLD {
        analysis.opportunities.push(format!(
            "Consider combining {} RUN instructions to reduce layers",
            analysis.run_instructions
        ));
    }
    if analysis.stages == 1 && build_tools {
        analysis
            .opportunities
            .push("Consider a multi-stage build to keep build tools out of the final image".into());
    }
    analysis
        .opportunities
        .push("Ensure a .dockerignore file excludes what the image does not need".into());

    analysis.estimated_size_mb = analysis
        .base_image
        .as_deref()
        .map_or(DEFAULT_BASE_IMAGE_MB, base_image_size_mb)
        + analysis.layer_count as f64 * MB_PER_LAYER;
    analysis
}

/// Per-RUN findings; returns whether a package cache is left behind
fn run_issues(inst: &Instruction, previous_was_run: bool, issues: &mut Vec<DockerfileIssue>) -> bool {
    let cmd = inst.args.as_str();
    let mut push = |message: &str| {
        issues.push(DockerfileIssue {
            line: inst.line,
            message: message.to_string(),
        })
    };
    let mut uncleaned = false;

    if cmd.contains("apt-get install") {
        if !cmd.contains("--no-install-recommends") {
            push("Add --no-install-recommends to apt-get install");
        }
        if !cmd.contains(APT_CLEANUP) {
            push("Missing apt cache cleanup");
            uncleaned = true;
        }
    } else if cmd.contains("apt-get update") {
        push("Combine apt-get update with install in the same RUN instruction");
    }
    if cmd.contains("apk add") && !cmd.contains("--no-cache") {
        push("Use apk add --no-cache");
        uncleaned = true;
    }
    if cmd.contains("yum install") && !cmd.contains(YUM_CLEANUP) {
        push("Missing yum cache cleanup");
        uncleaned = true;
    }
    if previous_was_run {
        push("Consider combining with the previous RUN instruction");
    }
    uncleaned
}

pub fn generate_optimizations(
    analysis: &DockerfileAnalysis,
    strategy: OptimizationStrategy,
) -> Vec<Optimization> {
    use OptimizationStrategy::{Cache, Layers, Size};

    let mut optimizations = Vec::new();

    if strategy.includes(Size) {
        if let Some(image) = analysis.base_image.as_deref() {
            if let Some(alternative) = alternative_for(image) {
                let mut o = Optimization::new(
                    OptimizationKind::BaseImage,
                    format!("Replace {image} with {alternative}"),
                    ImpactLevel::High,
                    BASE_IMAGE_REDUCTION_PERCENT,
                    true,
                );
                o.original = Some(image.to_string());
                o.replacement = Some(alternative.to_string());
                optimizations.push(o);
            }
        }
        if analysis.estimated_size_mb > MULTI_STAGE_SIZE_THRESHOLD_MB && analysis.stages <= 1 {
            optimizations.push(
                Optimization::new(
                    OptimizationKind::MultiStage,
                    "Implement a multi-stage build to reduce final image size",
                    ImpactLevel::High,
                    MULTI_STAGE_REDUCTION_PERCENT,
                    false,
                )
                .with_details("Use separate build and runtime stages"),
            );
        }
    }

    if strategy.includes(Layers) && analysis.layer_count > LAYER_REDUCTION_THRESHOLD {
        let target = MIN_TARGET_LAYERS.max(analysis.layer_count / 2);
        optimizations.push(
            Optimization::new(
                OptimizationKind::LayerReduction,
                format!(
                    "Reduce {} layers by combining RUN instructions",
                    analysis.layer_count
                ),
                ImpactLevel::Medium,
                LAYER_REDUCTION_PERCENT,
                true,
            )
            .with_details(format!("Aim for {target} layers or fewer")),
        );
    }

    if strategy.includes(Cache) {
        if analysis.copy_instructions > 0 {
            optimizations.push(
                Optimization::new(
                    OptimizationKind::CopyOrdering,
                    "Order COPY instructions for better layer caching",
                    ImpactLevel::Medium,
                    COPY_ORDERING_REDUCTION_PERCENT,
                    false,
                )
                .with_details("Copy dependency manifests before source code"),
            );
        }
        if analysis.uncleaned_package_installs > 0 {
            optimizations.push(
                Optimization::new(
                    OptimizationKind::PackageCache,
                    "Add package manager cache cleanup",
                    ImpactLevel::Low,
                    PACKAGE_CACHE_REDUCTION_PERCENT,
                    true,
                )
                .with_details("Remove package manager caches in the installing RUN instruction"),
            );
        }
    }

    // Stable: equal reductions keep generation order
    optimizations.sort_by(|a, b| b.co2_reduction_percent.total_cmp(&a.co2_reduction_percent));
    optimizations
}

/// Rewrite `content` with every automatic optimisation, in the given order.
/// Manual optimisations are left for review.
pub fn apply_optimizations(content: &str, optimizations: &[Optimization]) -> String {
    let mut entries = parse(content);
    for optimization in optimizations.iter().filter(|o| o.auto_apply) {
        entries = match (optimization.kind, &optimization.original, &optimization.replacement) {
            (OptimizationKind::BaseImage, Some(original), Some(replacement)) => entries
                .into_iter()
                .map(|e| replace_base_image(e, original, replacement))
                .collect(),
            (OptimizationKind::LayerReduction, ..) => combine_runs(entries),
            (OptimizationKind::PackageCache, ..) => entries.into_iter().map(clean_package_caches).collect(),
            _ => entries,
        };
    }

    let mut rendered = entries
        .iter()
        .map(|e| match e {
            Entry::Instruction(inst) => inst.raw.as_str(),
            Entry::Verbatim(line) => line.as_str(),
        })
        .collect::<Vec<_>>()
        .join("\n");
    if content.ends_with('\n') {
        rendered.push('\n');
    }
    rendered
}

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Instruction(Instruction),
    /// Blank line or comment
    Verbatim(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Instruction {
    /// First physical line, 1-based
    line: usize,
    /// Upper-cased
    keyword: String,
    /// Arguments with continuation lines joined by a space
    args: String,
    /// Physical lines as written
    raw: String,
}

impl Instruction {
    fn from_lines(line: usize, lines: &[&str]) -> Self {
        let joined = lines
            .iter()
            .map(|l| l.trim().trim_end_matches('\\').trim())
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect::<Vec<_>>()
            .join(" ");
        let (keyword, args) = joined.split_once(char::is_whitespace).unwrap_or((joined.as_str(), ""));
        Self {
            line,
            keyword: keyword.to_ascii_uppercase(),
            args: args.trim().to_string(),
            raw: lines.join("\n"),
        }
    }

    fn is_shell_form(&self) -> bool {
        !self.args.starts_with('[')
    }

    /// Raw text without the leading keyword
    fn raw_command(&self) -> &str {
        let raw = self.raw.trim_start();
        raw.get(self.keyword.len()..).unwrap_or_default().trim_start()
    }

    fn append_command(&mut self, command: &str) {
        self.args = format!("{} && {}", self.args, command);
        self.raw = format!("{} && {}", self.raw.trim_end(), command);
    }
}

fn continues(line: &str) -> bool {
    line.trim_end().ends_with('\\')
}

fn parse(content: &str) -> Vec<Entry> {
    let mut entries = Vec::new();
    let mut pending: Option<(usize, Vec<&str>)> = None;

    for (i, line) in content.lines().enumerate() {
        if let Some((start, mut lines)) = pending.take() {
            lines.push(line);
            if continues(line) {
                pending = Some((start, lines));
            } else {
                entries.push(Entry::Instruction(Instruction::from_lines(start, &lines)));
            }
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            entries.push(Entry::Verbatim(line.to_string()));
        } else if continues(line) {
            pending = Some((i + 1, vec![line]));
        } else {
            entries.push(Entry::Instruction(Instruction::from_lines(i + 1, &[line])));
        }
    }
    if let Some((start, lines)) = pending {
        entries.push(Entry::Instruction(Instruction::from_lines(start, &lines)));
    }
    entries
}

/// Image named by a FROM instruction, skipping flags such as `--platform`
fn from_image(args: &str) -> Option<&str> {
    args.split_whitespace().find(|t| !t.starts_with("--"))
}

/// COPY or ADD whose sources include the whole build context
fn copies_whole_context(args: &str) -> bool {
    if args.starts_with('[') {
        return false;
    }
    let operands: Vec<&str> = args.split_whitespace().filter(|t| !t.starts_with("--")).collect();
    match operands.split_last() {
        Some((_, sources)) => sources.iter().any(|s| *s == "." || *s == "./"),
        None => false,
    }
}

fn replace_base_image(entry: Entry, original: &str, replacement: &str) -> Entry {
    match entry {
        Entry::Instruction(mut inst)
            if inst.keyword == "FROM"
                && from_image(&inst.args).is_some_and(|i| i.eq_ignore_ascii_case(original)) =>
        {
            let mut replaced = false;
            let args = inst
                .args
                .split_whitespace()
                .map(|t| {
                    if !replaced && !t.starts_with("--") {
                        replaced = true;
                        replacement
                    } else {
                        t
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");
            inst.raw = format!("FROM {args}");
            inst.args = args;
            Entry::Instruction(inst)
        }
        other => other,
    }
}

/// Merge directly consecutive shell-form RUN instructions
fn combine_runs(entries: Vec<Entry>) -> Vec<Entry> {
    let mut out: Vec<Entry> = Vec::with_capacity(entries.len());
    for entry in entries {
        if let Entry::Instruction(inst) = &entry {
            if inst.keyword == "RUN" && inst.is_shell_form() {
                if let Some(Entry::Instruction(prev)) = out.last_mut() {
                    if prev.keyword == "RUN" && prev.is_shell_form() {
                        prev.args = format!("{} && {}", prev.args, inst.args);
                        prev.raw = format!("{} && \\\n    {}", prev.raw.trim_end(), inst.raw_command());
                        continue;
                    }
                }
            }
        }
        out.push(entry);
    }
    out
}

fn clean_package_caches(entry: Entry) -> Entry {
    let mut inst = match entry {
        Entry::Instruction(inst) if inst.keyword == "RUN" && inst.is_shell_form() => inst,
        other => return other,
    };
    if inst.args.contains("apk add") && !inst.args.contains("--no-cache") {
        inst.args = inst.args.replace("apk add", "apk add --no-cache");
        inst.raw = inst.raw.replace("apk add", "apk add --no-cache");
    }
    if inst.args.contains("apt-get install") && !inst.args.contains(APT_CLEANUP) {
        inst.append_command(APT_CLEANUP);
    }
    if inst.args.contains("yum install") && !inst.args.contains(YUM_CLEANUP) {
        inst.append_command(YUM_CLEANUP);
    }
    Entry::Instruction(inst)
}
