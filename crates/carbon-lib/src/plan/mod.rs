//! Reduction plan generator
//!
//! Builds candidate actions from category audits, ranks them by effort tier
//! and cost effectiveness, then greedily selects the shortest prefix of the
//! ranking that reaches the requested reduction.

pub mod library;


use crate::error::{EngineError, Result};
use crate::models::AuditResult;
use chrono::{DateTime, Utc};
use library::ACTION_LIBRARY;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Floor for cost in the impact-per-cost score
pub const COST_EPSILON: f64 = 1e-6;
pub const WEEKS_PER_MONTH: f64 = 4.0;
pub const HOURS_PER_MONTH: f64 = 720.0;
pub const DEFAULT_EXECUTIONS_PER_MONTH: f64 = 100.0;
/// Monthly baseline above which base impacts are scaled up, kg CO2
pub const HIGH_EMISSIONS_KG: f64 = 1000.0;
/// Monthly baseline below which base impacts are scaled down, kg CO2
pub const LOW_EMISSIONS_KG: f64 = 100.0;
const REVIEW_WEEKS_PER_QUARTER: u32 = 12;
const MAX_REVIEWS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusArea {
    #[serde(alias = "aws")]
    Infrastructure,
    Local,
    Personal,
}

impl FocusArea {
    pub const ALL: [FocusArea; 3] = [Self::Infrastructure, Self::Local, Self::Personal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Infrastructure => "infrastructure",
            Self::Local => "local",
            Self::Personal => "personal",
        }
    }
}

impl fmt::Display for FocusArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FocusArea {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "infrastructure" | "aws" => Ok(Self::Infrastructure),
            "local" => Ok(Self::Local),
            "personal" => Ok(Self::Personal),
            other => Err(EngineError::invalid_input(
                "focus_area",
                other,
                "expected infrastructure, local or personal",
            )),
        }
    }
}

/// Which areas a plan draws candidates from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Focus {
    #[default]
    All,
    #[serde(alias = "aws")]
    Infrastructure,
    Local,
    Personal,
}

impl Focus {
    pub fn includes(&self, area: FocusArea) -> bool {
        match self {
            Self::All => true,
            Self::Infrastructure => area == FocusArea::Infrastructure,
            Self::Local => area == FocusArea::Local,
            Self::Personal => area == FocusArea::Personal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Infrastructure => "infrastructure",
            Self::Local => "local",
            Self::Personal => "personal",
        }
    }
}

impl fmt::Display for Focus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Focus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        Ok(match s.parse::<FocusArea>()? {
            FocusArea::Infrastructure => Self::Infrastructure,
            FocusArea::Local => Self::Local,
            FocusArea::Personal => Self::Personal,
        })
    }
}

/// Coarse implementation cost; ranks ahead of money
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffortTier {
    Low,
    Medium,
    High,
}

impl EffortTier {
    pub fn score(&self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 2.0,
            Self::High => 3.0,
        }
    }
}

impl fmt::Display for EffortTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// An action that may be selected into a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAction {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub area: FocusArea,
    pub impact_percent: f64,
    /// Signed currency amount, negative means net savings
    pub cost: f64,
    pub effort: EffortTier,
    pub timeline_weeks: u32,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub steps: Vec<String>,
}

impl CandidateAction {
    pub fn new(
        id: impl Into<String>,
        area: FocusArea,
        impact_percent: f64,
        cost: f64,
        effort: EffortTier,
        timeline_weeks: u32,
    ) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            description: String::new(),
            area,
            impact_percent,
            cost,
            effort,
            timeline_weeks,
            prerequisites: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn is_net_savings(&self) -> bool {
        self.cost < 0.0
    }

    /// Impact per unit of spend, for non-negative costs
    fn cost_effectiveness(&self) -> f64 {
        self.impact_percent / self.cost.max(COST_EPSILON)
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::invalid_input("candidate.id", "\"\"", "id must not be empty"));
        }
        if !self.impact_percent.is_finite() || self.impact_percent < 0.0 {
            return Err(EngineError::invalid_input(
                format!("{}.impact_percent", self.id),
                self.impact_percent,
                "impact must be a non-negative number",
            ));
        }
        if !self.cost.is_finite() {
            return Err(EngineError::invalid_input(
                format!("{}.cost", self.id),
                self.cost,
                "cost must be finite",
            ));
        }
        Ok(())
    }
}

/// Selection priority: effort tier first, then savings before spend
/// (savings by impact, spend by impact per cost), then id.
pub fn priority_order(a: &CandidateAction, b: &CandidateAction) -> Ordering {
    a.effort
        .cmp(&b.effort)
        .then_with(|| match (a.is_net_savings(), b.is_net_savings()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (true, true) => b
                .impact_percent
                .total_cmp(&a.impact_percent)
                .then_with(|| a.cost.total_cmp(&b.cost)),
            (false, false) => b.cost_effectiveness().total_cmp(&a.cost_effectiveness()),
        })
        .then_with(|| a.id.cmp(&b.id))
}

/// A selected action with its position and timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionAction {
    /// 1-based rank in the selection order
    pub priority: usize,
    pub id: String,
    pub title: String,
    pub description: String,
    pub area: FocusArea,
    pub impact_percent: f64,
    pub cost: f64,
    pub effort: EffortTier,
    pub timeline_weeks: u32,
    pub timeline_months: f64,
    /// Intrinsic timeline is longer than the requested timeframe
    pub exceeds_timeframe: bool,
    pub prerequisites: Vec<String>,
    pub steps: Vec<String>,
}

impl ReductionAction {
    fn from_candidate(priority: usize, c: CandidateAction, timeframe_months: u32) -> Self {
        let timeline_months = c.timeline_weeks as f64 / WEEKS_PER_MONTH;
        Self {
            priority,
            exceeds_timeframe: timeline_months > timeframe_months as f64,
            timeline_months,
            id: c.id,
            title: c.title,
            description: c.description,
            area: c.area,
            impact_percent: c.impact_percent,
            cost: c.cost,
            effort: c.effort,
            timeline_weeks: c.timeline_weeks,
            prerequisites: c.prerequisites,
            steps: c.steps,
        }
    }
}

/// Sequential implementation slot, quick wins first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanPhase {
    pub phase_number: usize,
    pub action_id: String,
    pub title: String,
    pub start_week: u32,
    pub end_week: u32,
    /// Phase ends after the requested timeframe
    pub beyond_timeframe: bool,
    pub deliverables: Vec<String>,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub week: u32,
    pub title: String,
    /// Impact of actions whose own timeline fits before this week
    pub expected_reduction_percent: f64,
}

/// Emissions the plan was sized against
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanBaseline {
    pub infrastructure_co2_kg_per_hour: f64,
    pub local_co2_kg_per_execution: f64,
    pub personal_co2_kg: f64,
    pub total_monthly_co2_kg: f64,
    /// Multiplier applied to every base impact
    pub impact_scale: f64,
}

impl PlanBaseline {
    pub fn from_audits(audits: &BTreeMap<FocusArea, AuditResult>, executions_per_month: f64) -> Self {
        let co2 = |area: FocusArea| audits.get(&area).filter(|a| !a.no_data);
        let infrastructure = co2(FocusArea::Infrastructure)
            .map(|a| a.co2_kg_per_hour())
            .unwrap_or(0.0);
        let local = co2(FocusArea::Local).map(|a| a.total_co2_kg).unwrap_or(0.0);
        let personal = co2(FocusArea::Personal).map(|a| a.total_co2_kg).unwrap_or(0.0);

        let monthly = infrastructure * HOURS_PER_MONTH + local * executions_per_month + personal;
        Self {
            infrastructure_co2_kg_per_hour: infrastructure,
            local_co2_kg_per_execution: local,
            personal_co2_kg: personal,
            total_monthly_co2_kg: monthly,
            impact_scale: impact_scale(monthly),
        }
    }
}

/// Larger footprints leave more to cut, small ones less
pub fn impact_scale(monthly_co2_kg: f64) -> f64 {
    if monthly_co2_kg > HIGH_EMISSIONS_KG {
        1.2
    } else if monthly_co2_kg > 0.0 && monthly_co2_kg < LOW_EMISSIONS_KG {
        0.8
    } else {
        1.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionPlan {
    pub plan_id: String,
    pub created_at: DateTime<Utc>,
    pub target_reduction_percent: f64,
    pub timeframe_months: u32,
    pub focus: Focus,
    pub actions: Vec<ReductionAction>,
    /// Sum of the selected actions' impacts
    pub cumulative_impact_percent: f64,
    pub target_met: bool,
    /// No candidate applied to the supplied audits
    pub pool_empty: bool,
    pub candidates_considered: usize,
    pub phases: Vec<PlanPhase>,
    pub milestones: Vec<Milestone>,
    pub total_cost: f64,
    pub avg_complexity: f64,
    pub success_probability: f64,
    pub baseline: PlanBaseline,
}

impl ReductionPlan {
    pub fn action(&self, id: &str) -> Option<&ReductionAction> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Actions flagged as extending beyond the timeframe
    pub fn overrunning(&self) -> impl Iterator<Item = &ReductionAction> {
        self.actions.iter().filter(|a| a.exceeds_timeframe)
    }
}

/// Progress recorded against a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanProgress {
    pub plan_id: String,
    pub updated_at: DateTime<Utc>,
    pub completed_actions: Vec<String>,
    pub completion_rate: f64,
    pub actual_reductions: BTreeMap<String, f64>,
    pub total_actual_reduction: f64,
    /// Actual minus planned cumulative impact
    pub variance_from_plan: f64,
}

/// Generates plans from category audits
#[derive(Debug, Clone)]
pub struct ReductionPlanner {
    executions_per_month: f64,
}

impl Default for ReductionPlanner {
    fn default() -> Self {
        Self {
            executions_per_month: DEFAULT_EXECUTIONS_PER_MONTH,
        }
    }
}

/// Generate a plan with the default planner settings
pub fn generate_plan(
    audits: &BTreeMap<FocusArea, AuditResult>,
    target_reduction_percent: f64,
    timeframe_months: u32,
    focus: Focus,
) -> Result<ReductionPlan> {
    ReductionPlanner::default().generate_plan(audits, target_reduction_percent, timeframe_months, focus)
}

impl ReductionPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// How often the locally audited workload runs per month
    pub fn with_executions_per_month(mut self, executions: f64) -> Self {
        self.executions_per_month = executions;
        self
    }

    /// Candidates applicable to `audits` within `focus`, impacts scaled once
    pub fn candidates(
        &self,
        audits: &BTreeMap<FocusArea, AuditResult>,
        focus: Focus,
    ) -> (Vec<CandidateAction>, PlanBaseline) {
        let baseline = PlanBaseline::from_audits(audits, self.executions_per_month);
        let candidates = ACTION_LIBRARY
            .iter()
            .filter(|t| focus.includes(t.area))
            .filter(|t| audits.get(&t.area).is_some_and(|a| t.rule.applies(a)))
            .map(|t| t.candidate(baseline.impact_scale))
            .collect();
        (candidates, baseline)
    }

    pub fn generate_plan(
        &self,
        audits: &BTreeMap<FocusArea, AuditResult>,
        target_reduction_percent: f64,
        timeframe_months: u32,
        focus: Focus,
    ) -> Result<ReductionPlan> {
        if !self.executions_per_month.is_finite() || self.executions_per_month < 0.0 {
            return Err(EngineError::invalid_input(
                "executions_per_month",
                self.executions_per_month,
                "must be a non-negative number",
            ));
        }
        let (candidates, baseline) = self.candidates(audits, focus);
        let mut plan = plan_from_candidates(candidates, target_reduction_percent, timeframe_months)?;
        plan.focus = focus;
        plan.baseline = baseline;
        Ok(plan)
    }
}

/// Rank and select from an explicit candidate pool.
///
/// Selection stops at the first prefix whose impact reaches the target. An
/// exhausted pool yields every candidate with `target_met` unset.
pub fn plan_from_candidates(
    mut candidates: Vec<CandidateAction>,
    target_reduction_percent: f64,
    timeframe_months: u32,
) -> Result<ReductionPlan> {
    if !target_reduction_percent.is_finite() || !(0.0..=100.0).contains(&target_reduction_percent) {
        return Err(EngineError::invalid_input(
            "target_reduction_percent",
            target_reduction_percent,
            "target must be within 0..=100",
        ));
    }
    if timeframe_months == 0 {
        return Err(EngineError::invalid_input(
            "timeframe_months",
            timeframe_months,
            "timeframe must be at least one month",
        ));
    }
    let mut seen = BTreeSet::new();
    for c in &candidates {
        c.validate()?;
        if !seen.insert(c.id.as_str()) {
            return Err(EngineError::invalid_input(
                "candidate.id",
                &c.id,
                "duplicate candidate id",
            ));
        }
    }

    let considered = candidates.len();
    candidates.sort_by(priority_order);

    let mut selected = Vec::new();
    let mut cumulative = 0.0;
    for candidate in candidates {
        if cumulative >= target_reduction_percent {
            break;
        }
        cumulative += candidate.impact_percent;
        selected.push(ReductionAction::from_candidate(
            selected.len() + 1,
            candidate,
            timeframe_months,
        ));
    }
    let target_met = cumulative >= target_reduction_percent;

    debug!(
        candidates = considered,
        selected = selected.len(),
        cumulative_impact = cumulative,
        target = target_reduction_percent,
        target_met,
        "Selected reduction actions"
    );

    let total_cost = selected.iter().map(|a| a.cost).sum();
    let avg_complexity = if selected.is_empty() {
        0.0
    } else {
        selected.iter().map(|a| a.effort.score()).sum::<f64>() / selected.len() as f64
    };

    let created_at = Utc::now();
    Ok(ReductionPlan {
        plan_id: format!("carbon_plan_{}", created_at.format("%Y%m%d_%H%M%S")),
        created_at,
        target_reduction_percent,
        timeframe_months,
        focus: Focus::All,
        phases: build_phases(&selected, timeframe_months),
        milestones: build_milestones(&selected, timeframe_months),
        success_probability: success_probability(avg_complexity, selected.len()),
        cumulative_impact_percent: cumulative,
        target_met,
        pool_empty: considered == 0,
        candidates_considered: considered,
        total_cost,
        avg_complexity,
        actions: selected,
        baseline: PlanBaseline {
            impact_scale: 1.0,
            ..Default::default()
        },
    })
}

/// Run actions back to back, shortest first
fn build_phases(actions: &[ReductionAction], timeframe_months: u32) -> Vec<PlanPhase> {
    let mut ordered: Vec<&ReductionAction> = actions.iter().collect();
    ordered.sort_by_key(|a| a.timeline_weeks);

    let horizon_weeks = timeframe_months as f64 * WEEKS_PER_MONTH;
    let mut week = 0u32;
    ordered
        .into_iter()
        .enumerate()
        .map(|(i, a)| {
            let start = week;
            week = week.saturating_add(a.timeline_weeks);
            PlanPhase {
                phase_number: i + 1,
                action_id: a.id.clone(),
                title: a.title.clone(),
                start_week: start,
                end_week: week,
                beyond_timeframe: week as f64 > horizon_weeks,
                deliverables: a.steps.clone(),
                dependencies: a.prerequisites.clone(),
            }
        })
        .collect()
}

/// Quarterly reviews within the timeframe, at most four
fn build_milestones(actions: &[ReductionAction], timeframe_months: u32) -> Vec<Milestone> {
    let quarters = (timeframe_months / 3).min(MAX_REVIEWS);
    (1..=quarters)
        .map(|q| {
            let week = q * REVIEW_WEEKS_PER_QUARTER;
            Milestone {
                week,
                title: format!("Q{} Review", q),
                expected_reduction_percent: actions
                    .iter()
                    .filter(|a| a.timeline_weeks <= week)
                    .map(|a| a.impact_percent)
                    .sum(),
            }
        })
        .collect()
}

/// Harder and more numerous actions are less likely to all land
fn success_probability(avg_complexity: f64, action_count: usize) -> f64 {
    if action_count == 0 {
        return 1.0;
    }
    let complexity_factor = (1.0 - (avg_complexity - 1.0) * 0.2).max(0.3);
    let count_factor = (1.0 - action_count as f64 * 0.05).max(0.5);
    (complexity_factor * count_factor).clamp(0.0, 1.0)
}

/// Record completed actions and measured reductions against a plan
pub fn record_progress(
    plan: &ReductionPlan,
    completed_actions: &[String],
    actual_reductions: &BTreeMap<String, f64>,
) -> Result<PlanProgress> {
    for id in completed_actions.iter().chain(actual_reductions.keys()) {
        if plan.action(id).is_none() {
            return Err(EngineError::invalid_input(
                "action_id",
                id,
                "action is not part of the plan",
            ));
        }
    }
    for (id, value) in actual_reductions {
        if !value.is_finite() {
            return Err(EngineError::invalid_input(
                format!("actual_reductions.{}", id),
                value,
                "reduction must be finite",
            ));
        }
    }

    let completed: Vec<String> = completed_actions
        .iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .cloned()
        .collect();
    let completion_rate = if plan.actions.is_empty() {
        0.0
    } else {
        completed.len() as f64 / plan.actions.len() as f64
    };
    let total_actual: f64 = actual_reductions.values().sum();

    Ok(PlanProgress {
        plan_id: plan.plan_id.clone(),
        updated_at: Utc::now(),
        completed_actions: completed,
        completion_rate,
        actual_reductions: actual_reductions.clone(),
        total_actual_reduction: total_actual,
        variance_from_plan: total_actual - plan.cumulative_impact_percent,
    })
}
