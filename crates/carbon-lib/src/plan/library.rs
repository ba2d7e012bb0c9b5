//! Reduction action library
//!
//! Each template carries its base impact and an applicability rule checked
//! against the audit of its area.

use super::{CandidateAction, EffortTier, FocusArea};
use crate::models::AuditResult;

/// When a template is worth proposing for an audit
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Applicability {
    /// Any non-empty audit with emissions
    AreaPresent,
    /// At least one resource below the idle threshold
    IdleResources,
    /// Emissions recorded under any of these breakdown keys
    BreakdownAny(&'static [&'static str]),
    /// CPU share of power at or above this percentage
    CpuShareAtLeast(f64),
    /// Memory share of power at or above this percentage
    MemoryShareAtLeast(f64),
    /// Disk I/O contributed power
    DiskActivity,
}

impl Applicability {
    pub fn applies(&self, audit: &AuditResult) -> bool {
        if audit.no_data || audit.total_co2_kg <= 0.0 {
            return false;
        }
        let distribution = &audit.utilization.power_distribution;
        match *self {
            Self::AreaPresent => true,
            Self::IdleResources => audit.utilization.idle_resources > 0,
            Self::BreakdownAny(keys) => keys
                .iter()
                .any(|k| audit.category_breakdown.get(*k).is_some_and(|v| *v > 0.0)),
            Self::CpuShareAtLeast(p) => distribution.cpu_percent >= p,
            Self::MemoryShareAtLeast(p) => distribution.memory_percent >= p,
            Self::DiskActivity => audit.power_breakdown.disk_watts > 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ActionTemplate {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub area: FocusArea,
    pub impact_percent: f64,
    /// Negative values are net savings
    pub cost: f64,
    pub effort: EffortTier,
    pub timeline_weeks: u32,
    pub prerequisites: &'static [&'static str],
    pub steps: &'static [&'static str],
    pub rule: Applicability,
}

impl ActionTemplate {
    /// Candidate with its base impact multiplied by `impact_scale`
    pub fn candidate(&self, impact_scale: f64) -> CandidateAction {
        CandidateAction {
            id: self.id.to_string(),
            title: self.title.to_string(),
            description: self.description.to_string(),
            area: self.area,
            impact_percent: self.impact_percent * impact_scale,
            cost: self.cost,
            effort: self.effort,
            timeline_weeks: self.timeline_weeks,
            prerequisites: self.prerequisites.iter().map(|s| s.to_string()).collect(),
            steps: self.steps.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub const ACTION_LIBRARY: &[ActionTemplate] = &[
    ActionTemplate {
        id: "rightsize-instances",
        title: "Right-size EC2 Instances",
        description: "Right-size instances based on actual usage patterns",
        area: FocusArea::Infrastructure,
        impact_percent: 15.0,
        cost: -200.0,
        effort: EffortTier::Medium,
        timeline_weeks: 2,
        prerequisites: &["CloudWatch monitoring enabled"],
        steps: &[
            "Analyze CPU and memory utilization metrics",
            "Identify over-provisioned instances",
            "Create instance resize plan",
            "Schedule maintenance windows for resizing",
            "Monitor performance after changes",
        ],
        rule: Applicability::IdleResources,
    },
    ActionTemplate {
        id: "auto-scaling",
        title: "Implement Auto Scaling",
        description: "Set up auto scaling groups to match demand",
        area: FocusArea::Infrastructure,
        impact_percent: 25.0,
        cost: -300.0,
        effort: EffortTier::High,
        timeline_weeks: 4,
        prerequisites: &[
            "Load balancer configured",
            "Application supports horizontal scaling",
        ],
        steps: &[
            "Create launch templates",
            "Configure auto scaling groups",
            "Set up scaling policies",
            "Test scaling behavior",
            "Monitor and tune thresholds",
        ],
        rule: Applicability::BreakdownAny(&["ec2"]),
    },
    ActionTemplate {
        id: "graviton-migration",
        title: "Migrate to ARM-based Instances",
        description: "Switch to Graviton processors for better energy efficiency",
        area: FocusArea::Infrastructure,
        impact_percent: 20.0,
        cost: -150.0,
        effort: EffortTier::Medium,
        timeline_weeks: 3,
        prerequisites: &["Application compatibility with ARM"],
        steps: &[
            "Test application on ARM instances",
            "Update deployment scripts",
            "Plan migration schedule",
            "Execute migration",
            "Validate performance",
        ],
        rule: Applicability::BreakdownAny(&["ec2", "rds"]),
    },
    ActionTemplate {
        id: "s3-storage-classes",
        title: "Optimize S3 Storage Classes",
        description: "Move infrequently accessed data to cheaper, lower-carbon storage",
        area: FocusArea::Infrastructure,
        impact_percent: 10.0,
        cost: -100.0,
        effort: EffortTier::Low,
        timeline_weeks: 1,
        prerequisites: &["S3 access patterns analyzed"],
        steps: &[
            "Analyze S3 access patterns",
            "Create lifecycle policies",
            "Test data retrieval",
            "Apply policies to buckets",
            "Monitor cost and access patterns",
        ],
        rule: Applicability::BreakdownAny(&["s3"]),
    },
    ActionTemplate {
        id: "schedule-batch-workloads",
        title: "Schedule Non-Critical Workloads",
        description: "Run batch jobs during off-peak hours when the grid is cleaner",
        area: FocusArea::Infrastructure,
        impact_percent: 12.0,
        cost: -50.0,
        effort: EffortTier::Medium,
        timeline_weeks: 2,
        prerequisites: &["Workloads identified", "Scheduling system available"],
        steps: &[
            "Identify batch workloads",
            "Analyze grid carbon intensity patterns",
            "Create scheduling rules",
            "Implement job scheduling",
            "Monitor execution and carbon impact",
        ],
        rule: Applicability::AreaPresent,
    },
    ActionTemplate {
        id: "optimize-algorithms",
        title: "Optimize Algorithm Efficiency",
        description: "Refactor code to reduce computational complexity",
        area: FocusArea::Local,
        impact_percent: 30.0,
        cost: 0.0,
        effort: EffortTier::High,
        timeline_weeks: 6,
        prerequisites: &["Code profiling completed"],
        steps: &[
            "Profile application performance",
            "Identify computational bottlenecks",
            "Research more efficient algorithms",
            "Implement optimizations",
            "Test and validate improvements",
        ],
        rule: Applicability::AreaPresent,
    },
    ActionTemplate {
        id: "caching",
        title: "Implement Caching Strategies",
        description: "Add caching to reduce redundant computations",
        area: FocusArea::Local,
        impact_percent: 20.0,
        cost: 50.0,
        effort: EffortTier::Medium,
        timeline_weeks: 3,
        prerequisites: &["Cache infrastructure available"],
        steps: &[
            "Identify cacheable operations",
            "Choose appropriate caching strategy",
            "Implement cache layer",
            "Test cache hit rates",
            "Monitor performance improvements",
        ],
        rule: Applicability::CpuShareAtLeast(50.0),
    },
    ActionTemplate {
        id: "optimize-db-queries",
        title: "Optimize Database Queries",
        description: "Improve database query efficiency and indexing",
        area: FocusArea::Local,
        impact_percent: 15.0,
        cost: 0.0,
        effort: EffortTier::Medium,
        timeline_weeks: 2,
        prerequisites: &["Database access available"],
        steps: &[
            "Analyze slow query logs",
            "Identify missing indexes",
            "Optimize query structure",
            "Add appropriate indexes",
            "Monitor query performance",
        ],
        rule: Applicability::DiskActivity,
    },
    ActionTemplate {
        id: "reduce-memory",
        title: "Reduce Memory Usage",
        description: "Optimize memory allocation and data structures",
        area: FocusArea::Local,
        impact_percent: 10.0,
        cost: 0.0,
        effort: EffortTier::Medium,
        timeline_weeks: 4,
        prerequisites: &["Memory profiling tools available"],
        steps: &[
            "Profile memory usage patterns",
            "Identify memory leaks",
            "Optimize data structures",
            "Tune allocation patterns",
            "Validate memory improvements",
        ],
        rule: Applicability::MemoryShareAtLeast(30.0),
    },
    ActionTemplate {
        id: "reduce-meat",
        title: "Reduce Meat Consumption",
        description: "Replace high-carbon meat with plant-based alternatives",
        area: FocusArea::Personal,
        impact_percent: 40.0,
        cost: -20.0,
        effort: EffortTier::Medium,
        timeline_weeks: 8,
        prerequisites: &["Dietary preferences flexible"],
        steps: &[
            "Research plant-based protein sources",
            "Plan weekly meal menus",
            "Try new recipes gradually",
            "Track dietary changes",
            "Monitor health and satisfaction",
        ],
        rule: Applicability::BreakdownAny(&["meat"]),
    },
    ActionTemplate {
        id: "optimize-transport",
        title: "Optimize Transportation",
        description: "Use public transport, cycling, or walking more frequently",
        area: FocusArea::Personal,
        impact_percent: 35.0,
        cost: -100.0,
        effort: EffortTier::Low,
        timeline_weeks: 2,
        prerequisites: &["Alternative transport options available"],
        steps: &[
            "Map current transportation patterns",
            "Identify alternative routes",
            "Test public transport options",
            "Plan combined trips",
            "Track transportation changes",
        ],
        rule: Applicability::AreaPresent,
    },
    ActionTemplate {
        id: "reduce-home-energy",
        title: "Reduce Energy Consumption",
        description: "Implement energy-saving practices at home",
        area: FocusArea::Personal,
        impact_percent: 25.0,
        cost: -150.0,
        effort: EffortTier::Low,
        timeline_weeks: 1,
        prerequisites: &["Home energy audit completed"],
        steps: &[
            "Conduct home energy audit",
            "Replace inefficient appliances",
            "Improve insulation",
            "Adjust thermostat settings",
            "Monitor energy usage",
        ],
        rule: Applicability::AreaPresent,
    },
    ActionTemplate {
        id: "buy-local-seasonal",
        title: "Buy Local and Seasonal",
        description: "Choose locally produced, seasonal foods",
        area: FocusArea::Personal,
        impact_percent: 15.0,
        cost: 0.0,
        effort: EffortTier::Low,
        timeline_weeks: 2,
        prerequisites: &["Local markets available"],
        steps: &[
            "Research local food sources",
            "Learn seasonal food calendar",
            "Plan shopping around local options",
            "Try farmers markets",
            "Track local food purchases",
        ],
        rule: Applicability::AreaPresent,
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityCategory, PowerBreakdown};
    use std::collections::HashSet;

    fn audit_with(co2: f64) -> AuditResult {
        let mut a = AuditResult::empty(ActivityCategory::LocalProcess, 1.0, 0.0005);
        a.no_data = false;
        a.total_co2_kg = co2;
        a
    }

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<_> = ACTION_LIBRARY.iter().map(|t| t.id).collect();
        assert_eq!(ids.len(), ACTION_LIBRARY.len());
    }

    #[test]
    fn test_empty_audit_never_applies() {
        let empty = AuditResult::empty(ActivityCategory::LocalProcess, 1.0, 0.0005);
        assert!(ACTION_LIBRARY.iter().all(|t| !t.rule.applies(&empty)));
    }

    #[test]
    fn test_share_rules() {
        let mut audit = audit_with(1.0);
        audit.power_breakdown = PowerBreakdown::new(30.0, 10.0, 0.0, 0.0);
        audit.utilization.power_distribution = audit.power_breakdown.distribution();

        assert!(Applicability::CpuShareAtLeast(50.0).applies(&audit));
        assert!(!Applicability::MemoryShareAtLeast(30.0).applies(&audit));
        assert!(!Applicability::DiskActivity.applies(&audit));
    }

    #[test]
    fn test_breakdown_rule() {
        let mut audit = audit_with(1.0);
        audit.category_breakdown.insert("meat".into(), 2.0);
        assert!(Applicability::BreakdownAny(&["meat"]).applies(&audit));
        assert!(!Applicability::BreakdownAny(&["s3"]).applies(&audit));
    }

    #[test]
    fn test_candidate_scaling() {
        let c = ACTION_LIBRARY[0].candidate(1.2);
        assert_eq!(c.impact_percent, 15.0 * 1.2);
        assert_eq!(c.steps.len(), 5);
    }
}
