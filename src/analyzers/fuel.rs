//! Fuel delivery: injector headroom, mixture at load, airflow efficiency and
//! bank balance.

use super::{
    above, below, AnalysisContext, Condition, DomainAnalyzer, Finding, Rule, Severity, Status, Subsystem,
    SINGLE_BANK_CONFIDENCE,
};
use crate::channels::ChannelId;
use crate::frame::DerivedChannel;
use crate::modes::Mode;
use crate::stats;

pub struct FuelMetrics {
    pub duty_max: Option<f64>,
    /// Mean lambda over WOT samples only.
    pub lambda_wot_mean: Option<f64>,
}

pub const MIXTURE_RULES: &[Rule<FuelMetrics>] = &[
    Rule {
        severity: Severity::HardLimit,
        status: Status::InjectorSaturated,
        message: "injector saturated",
        recommendation: Some("Fit larger injectors or raise fuel pressure"),
        when: |m, t| above(m.duty_max, t.duty_hard_limit),
    },
    Rule {
        severity: Severity::Critical,
        status: Status::LeanAtLoad,
        message: "lean at load",
        recommendation: Some("Add fuel at high load; check fuel pressure and pump delivery"),
        when: |m, t| above(m.lambda_wot_mean, t.lambda_lean),
    },
    Rule {
        severity: Severity::Warning,
        status: Status::RichAtLoad,
        message: "rich/inefficient at load",
        recommendation: Some("Trim enrichment at high load"),
        when: |m, t| below(m.lambda_wot_mean, t.lambda_rich),
    },
    Rule {
        severity: Severity::Safe,
        status: Status::Nominal,
        message: "fuel delivery within limits",
        recommendation: None,
        when: |_, _| true,
    },
];

pub struct AirflowMetrics {
    pub ve_mean: Option<f64>,
    pub bank_delta_mean: Option<f64>,
}

pub const AIRFLOW_RULES: &[Rule<AirflowMetrics>] = &[
    Rule {
        severity: Severity::Critical,
        status: Status::LowVolumetricEfficiency,
        message: "low volumetric efficiency",
        recommendation: Some("Review the load map and the intake tract"),
        when: |m, t| below(m.ve_mean, t.ve_min),
    },
    Rule {
        severity: Severity::Safe,
        status: Status::Nominal,
        message: "volumetric efficiency within limits",
        recommendation: None,
        when: |_, _| true,
    },
];

pub const BANK_RULES: &[Rule<AirflowMetrics>] = &[
    Rule {
        severity: Severity::Critical,
        status: Status::BankImbalance,
        message: "lambda imbalance between banks",
        recommendation: Some("Check injectors, exhaust sealing and per-bank corrections"),
        when: |m, t| above(m.bank_delta_mean, t.lambda_bank_delta_max),
    },
    Rule {
        severity: Severity::Safe,
        status: Status::Nominal,
        message: "banks balanced",
        recommendation: None,
        when: |_, _| true,
    },
];

pub struct FuelAnalyzer;

impl FuelAnalyzer {
    fn mixture(&self, ctx: &AnalysisContext<'_>) -> Finding {
        if !ctx.bound(ChannelId::Rpm) {
            return Finding::no_data(Subsystem::Fuel, "rpm not bound; injector duty and WOT mixture unavailable");
        }

        let duty_max = ctx.values(DerivedChannel::InjectorDuty).and_then(|v| stats::max(&v));
        let lambda_wot_mean = ctx
            .frame
            .derived(DerivedChannel::LambdaAvg)
            .and_then(|s| stats::mean(&ctx.masks.select(Mode::Wot, s)));

        if duty_max.is_none() && lambda_wot_mean.is_none() {
            return Finding::no_data(
                Subsystem::Fuel,
                "no injector duty or WOT lambda samples available",
            );
        }

        let mut inputs = vec![ChannelId::Rpm];
        if duty_max.is_some() {
            inputs.push(ChannelId::InjectionTime);
        }
        if lambda_wot_mean.is_some() {
            inputs.extend([ChannelId::Load, ChannelId::Lambda1, ChannelId::Lambda2]);
        }

        let metrics = FuelMetrics {
            duty_max,
            lambda_wot_mean,
        };
        let mut finding = ctx.evaluate(
            Subsystem::Fuel,
            MIXTURE_RULES,
            &metrics,
            vec![("duty_max", duty_max), ("lambda_wot_mean", lambda_wot_mean)],
            &inputs,
        );

        // One bank standing in for two is a weaker basis for the mixture call.
        let single_bank = lambda_wot_mean.is_some() && ctx.bound(ChannelId::Lambda1) != ctx.bound(ChannelId::Lambda2);
        if single_bank {
            finding.confidence = finding.confidence.min(SINGLE_BANK_CONFIDENCE);
        }
        if ctx.frame.degenerate_count(DerivedChannel::InjectorDuty) > 0 {
            finding.conditions.push(Condition::ComputationDegenerate);
        }
        finding
    }

    fn airflow(&self, ctx: &AnalysisContext<'_>) -> Option<Finding> {
        let ve_mean = ctx
            .values(DerivedChannel::VolumetricEfficiency)
            .and_then(|v| stats::mean(&v))?;
        let metrics = AirflowMetrics {
            ve_mean: Some(ve_mean),
            bank_delta_mean: None,
        };
        let mut finding = ctx.evaluate(
            Subsystem::Fuel,
            AIRFLOW_RULES,
            &metrics,
            vec![("ve_mean", Some(ve_mean))],
            &[ChannelId::AirMass, ChannelId::Rpm],
        );
        if ctx.frame.degenerate_count(DerivedChannel::VolumetricEfficiency) > 0 {
            finding.conditions.push(Condition::ComputationDegenerate);
        }
        Some(finding)
    }

    fn bank_balance(&self, ctx: &AnalysisContext<'_>) -> Option<Finding> {
        let delta = ctx
            .values(DerivedChannel::LambdaBankDelta)
            .and_then(|v| stats::mean(&v))?;
        let metrics = AirflowMetrics {
            ve_mean: None,
            bank_delta_mean: Some(delta),
        };
        Some(ctx.evaluate(
            Subsystem::Fuel,
            BANK_RULES,
            &metrics,
            vec![("lambda_bank_delta_mean", Some(delta))],
            &[ChannelId::Lambda1, ChannelId::Lambda2],
        ))
    }
}

impl DomainAnalyzer for FuelAnalyzer {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Fuel
    }

    fn analyze(&self, ctx: &AnalysisContext<'_>) -> Vec<Finding> {
        let mut out = vec![self.mixture(ctx)];
        out.extend(self.airflow(ctx));
        out.extend(self.bank_balance(ctx));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::{find, Fixture};
    use crate::data::Column;

    fn wot_fixture(lambda: f64, injection_ms: f64) -> Fixture {
        Fixture::new(vec![
            Column::dense("Motor RPM", &[5000.0, 5200.0, 5400.0, 5600.0]),
            Column::dense("Engine load", &[90.0, 92.0, 95.0, 97.0]),
            Column::dense("Injection time", &[injection_ms; 4]),
            Column::dense("Lambda 1", &[lambda; 4]),
            Column::dense("Lambda 2", &[lambda; 4]),
        ])
    }

    #[test]
    fn test_saturation_outranks_lean() {
        // duty = 20 * 5600 / 1200 = 93.3, lambda also lean
        let fx = wot_fixture(0.95, 20.0);
        let f = FuelAnalyzer.analyze(&fx.ctx());
        assert_eq!(f[0].status, Status::InjectorSaturated);
        assert_eq!(f[0].severity, Severity::HardLimit);
    }

    #[test]
    fn test_duty_95_is_hard_limit() {
        let fx = Fixture::new(vec![
            Column::dense("Motor RPM", &[6000.0, 6000.0]),
            Column::dense("Engine load", &[20.0, 20.0]),
            Column::dense("Injection time", &[10.0, 19.0]),
            Column::dense("Lambda 1", &[0.7, 0.7]),
        ]);
        let f = FuelAnalyzer.analyze(&fx.ctx());
        assert_eq!(f[0].metric("duty_max"), Some(95.0));
        assert_eq!(f[0].severity, Severity::HardLimit);
    }

    #[test]
    fn test_lean_boundary_is_strict() {
        let at = FuelAnalyzer.analyze(&wot_fixture(0.88, 5.0).ctx());
        assert_eq!(at[0].status, Status::Nominal);

        let over = FuelAnalyzer.analyze(&wot_fixture(0.881, 5.0).ctx());
        assert_eq!(over[0].status, Status::LeanAtLoad);
        assert_eq!(over[0].severity, Severity::Critical);
        assert!(over[0].conditions.contains(&Condition::ValueOutOfThreshold));
    }

    #[test]
    fn test_rich_at_load() {
        let f = FuelAnalyzer.analyze(&wot_fixture(0.75, 5.0).ctx());
        assert_eq!(f[0].status, Status::RichAtLoad);
        assert_eq!(f[0].severity, Severity::Warning);
    }

    #[test]
    fn test_lean_only_counts_wot_samples() {
        // Lean cruise samples must not drive the WOT mixture call.
        let fx = Fixture::new(vec![
            Column::dense("Motor RPM", &[2500.0, 2500.0, 5000.0, 5000.0]),
            Column::dense("Engine load", &[40.0, 40.0, 90.0, 90.0]),
            Column::dense("Lambda 1", &[1.05, 1.05, 0.82, 0.82]),
            Column::dense("Lambda 2", &[1.05, 1.05, 0.82, 0.82]),
        ]);
        let f = FuelAnalyzer.analyze(&fx.ctx());
        assert_eq!(f[0].status, Status::Nominal);
        assert!((f[0].metric("lambda_wot_mean").unwrap() - 0.82).abs() < 1e-12);
    }

    #[test]
    fn test_single_bank_caps_confidence() {
        let fx = Fixture::new(vec![
            Column::dense("Motor RPM", &[5000.0, 5100.0]),
            Column::dense("Engine load", &[90.0, 91.0]),
            Column::dense("Lambda 1", &[0.85, 0.86]),
        ]);
        let f = FuelAnalyzer.analyze(&fx.ctx());
        assert_eq!(f[0].confidence, SINGLE_BANK_CONFIDENCE);
    }

    #[test]
    fn test_missing_rpm_is_no_data() {
        let fx = Fixture::new(vec![
            Column::dense("Injection time", &[3.0, 4.0]),
            Column::dense("Lambda 1", &[0.9, 0.95]),
        ]);
        let f = FuelAnalyzer.analyze(&fx.ctx());
        assert_eq!(f[0].status, Status::NoData);
        assert_eq!(f[0].confidence, 0.0);
    }

    #[test]
    fn test_degenerate_ve_sample_marked_on_finding() {
        // rpm * 0.16 + 1 == 0 at rpm = -6.25
        let fx = Fixture::new(vec![
            Column::dense("Motor RPM", &[-6.25, 1000.0]),
            Column::dense("Air mass", &[100.0, 100.0]),
        ]);
        let f = FuelAnalyzer.analyze(&fx.ctx());
        let ve = find(&f, Status::LowVolumetricEfficiency).unwrap();
        assert!(ve.conditions.contains(&Condition::ComputationDegenerate));
        // only the finite sample feeds the mean
        assert!((ve.metric("ve_mean").unwrap() - 10000.0 / 161.0).abs() < 1e-9);
    }

    #[test]
    fn test_lean_finding_recommends_action() {
        let f = FuelAnalyzer.analyze(&wot_fixture(0.95, 5.0).ctx());
        assert_eq!(f[0].status, Status::LeanAtLoad);
        assert!(f[0].recommendation.as_deref().unwrap().contains("fuel pressure"));
    }

    #[test]
    fn test_bank_imbalance_and_low_ve() {
        let fx = Fixture::new(vec![
            Column::dense("Motor RPM", &[3000.0, 3100.0]),
            Column::dense("Air mass", &[100.0, 110.0]),
            Column::dense("Lambda #1 integrator ", &[1.00, 1.02]),
            Column::dense("Lambda #2 integrator", &[0.94, 0.96]),
        ]);
        let f = FuelAnalyzer.analyze(&fx.ctx());
        assert!(find(&f, Status::LowVolumetricEfficiency).is_some());
        let bank = find(&f, Status::BankImbalance).unwrap();
        assert!((bank.metric("lambda_bank_delta_mean").unwrap() - 0.06).abs() < 1e-9);
    }
}
