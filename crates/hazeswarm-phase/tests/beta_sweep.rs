use hazeswarm_core::{Channel, PolarField, SpmBundle, SwarmCoordinator};
use hazeswarm_phase::{
    SweepConfig, compute_chi, compute_phi, export_csv, find_beta_c, run_beta_sweep,
};
use rand::{Rng, SeedableRng, rngs::SmallRng};

fn saliency_bundle(seed: u64) -> SpmBundle {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut bundle = SpmBundle::new();
    bundle.set(
        Channel::F2,
        PolarField::from_fn(|_, _| rng.random_range(0.2..0.8)),
    );
    bundle
}

#[test]
fn light_sweep_shows_beta_dependence_without_blowups() {
    let config = SweepConfig {
        n_agents: 20,
        k: 6,
        betas: vec![0.05, 0.07, 0.09, 0.11, 0.13],
        warmup_steps: 500,
        measure_steps: 100,
        dt: 0.1,
        ..SweepConfig::default()
    };
    let bundle = saliency_bundle(2024);

    let samples = run_beta_sweep(&config, &bundle).expect("sweep");
    assert_eq!(samples.len(), config.betas.len());

    let phi_max = samples.iter().map(|s| s.phi_mean).fold(f64::MIN, f64::max);
    let phi_min = samples.iter().map(|s| s.phi_mean).fold(f64::MAX, f64::min);
    assert!(
        phi_max - phi_min > 0.003,
        "phi should vary across the beta grid: max {phi_max}, min {phi_min}"
    );

    for sample in &samples {
        assert!(sample.phi_mean.is_finite());
        assert!(sample.chi.is_finite());
        assert!(sample.chi >= -1e-9, "chi must be non-negative: {}", sample.chi);
    }
}

#[test]
fn sweep_results_are_reproducible() {
    let config = SweepConfig {
        n_agents: 10,
        k: 4,
        betas: vec![0.0, 0.1, 0.2],
        warmup_steps: 20,
        measure_steps: 10,
        dt: 0.1,
        ..SweepConfig::default()
    };
    let bundle = saliency_bundle(5);

    let first = run_beta_sweep(&config, &bundle).expect("first sweep");
    let second = run_beta_sweep(&config, &bundle).expect("second sweep");
    assert_eq!(first, second);
}

#[test]
fn sweep_rejects_invalid_configurations() {
    let bundle = SpmBundle::new();
    let config = SweepConfig {
        betas: Vec::new(),
        ..SweepConfig::default()
    };
    assert!(run_beta_sweep(&config, &bundle).is_err());
}

#[test]
fn pure_mixing_dynamics_erode_phi_monotonically_in_beta() {
    // Without agent motion, repeated mixing from the same haze disparity
    // leaves less spread the stronger the coupling.
    let mut phis = Vec::new();
    for &beta in &[0.0, 0.1, 0.3] {
        let mut swarm = SwarmCoordinator::new(10, beta, 9);
        let mut rng = SmallRng::seed_from_u64(123);
        for i in 0..swarm.size() {
            let level = rng.random_range(0.2..0.8);
            swarm
                .agent_mut(i)
                .set_effective_haze(PolarField::constant(level));
        }
        for _ in 0..20 {
            swarm.apply_mixing();
        }
        phis.push(compute_phi(&swarm.all_haze_fields()));
    }
    assert!(phis[0] > phis[1]);
    assert!(phis[1] > phis[2]);
}

#[test]
fn detected_critical_point_lies_inside_a_synthetic_sweep_grid() {
    let config = SweepConfig {
        n_agents: 10,
        k: 4,
        betas: vec![0.0, 0.05, 0.1, 0.15, 0.2],
        warmup_steps: 20,
        measure_steps: 10,
        dt: 0.1,
        ..SweepConfig::default()
    };
    let bundle = saliency_bundle(99);

    let samples = run_beta_sweep(&config, &bundle).expect("sweep");
    let betas: Vec<f64> = samples.iter().map(|s| s.beta).collect();
    let phis: Vec<f64> = samples.iter().map(|s| s.phi_mean).collect();

    let beta_c = find_beta_c(&betas, &phis).expect("beta_c");
    assert!(beta_c >= betas[0] && beta_c <= betas[betas.len() - 1]);
}

#[test]
fn csv_export_round_trips_with_exact_formatting() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("phase_transition.csv");

    let betas = [0.0, 0.05, 0.1];
    let phis = [0.123456789, 0.2, 0.0];
    let chis = [1.5, 0.000001234, 3.0];
    let success = export_csv(&path, &betas, &phis, &chis).expect("export");
    assert!(success);

    let contents = std::fs::read_to_string(&path).expect("read back");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "beta,phi,chi");
    assert_eq!(lines[1], "0.000000,0.123457,1.500000");
    assert_eq!(lines[2], "0.050000,0.200000,0.000001");
    assert_eq!(lines[3], "0.100000,0.000000,3.000000");
    assert!(!contents.contains('\r'), "line endings must be LF only");

    // Susceptibility of a constant series is zero, so the exported values
    // stay consistent with the analyzer.
    assert_eq!(compute_chi(&[0.2, 0.2, 0.2]), 0.0);
}
