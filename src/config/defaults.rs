//! Built-in package table: PathSim and its extension packages.
//!
//! Used when no `docforge.yaml` is present. Repositories are expected as
//! siblings of the docs checkout (`{root}/pathsim`, `{root}/pathsim-chem`, ...).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::schema::{
    CategoryDef, DocsConfig, EmbeddingConfig, ExampleCategory, ExecutionConfig, ExtractorConfig,
    GitConfig, PackageConfig,
};
use crate::types::MinorVersion;

/// Default config file name looked up in the working directory.
pub const CONFIG_FILE: &str = "docforge.yaml";

impl DocsConfig {
    /// The built-in corpus with source repositories under `repos_root` and
    /// output under `static_dir`.
    pub fn builtin(repos_root: &Path, static_dir: PathBuf) -> Self {
        Self {
            static_dir,
            packages: vec![
                package(
                    repos_root,
                    "pathsim",
                    "pathsim",
                    "PathSim",
                    "Block-diagram based simulation framework for dynamical systems",
                    &[
                        "pathsim",
                        "pathsim.blocks",
                        "pathsim.solvers",
                        "pathsim.events",
                        "pathsim.optim",
                        "pathsim.utils",
                    ],
                    MinorVersion::new(0, 7),
                ),
                package(
                    repos_root,
                    "chem",
                    "pathsim-chem",
                    "PathSim-Chem",
                    "Chemical reaction network simulation",
                    &["pathsim_chem", "pathsim_chem.tritium"],
                    MinorVersion::new(0, 1),
                ),
                package(
                    repos_root,
                    "vehicle",
                    "pathsim-vehicle",
                    "PathSim-Vehicle",
                    "Vehicle dynamics simulation",
                    &["pathsim_vehicle"],
                    MinorVersion::new(0, 1),
                ),
            ],
            categories: builtin_categories(),
            example_categories: builtin_example_categories(),
            non_executable: [
                "fmu_cosimulation",
                "fmu_model_exchange_bouncing_ball",
                "fmu_model_exchange_vanderpol",
                "rf_network_oneport",
            ]
            .into_iter()
            .map(String::from)
            .collect::<BTreeSet<_>>(),
            skip_module_patterns: vec!["_constants".into(), "_version".into(), "__pycache__".into()],
            git: GitConfig::default(),
            extractor: ExtractorConfig::default(),
            execution: ExecutionConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

fn package(
    root: &Path,
    id: &str,
    repo_dir: &str,
    display_name: &str,
    description: &str,
    root_modules: &[&str],
    min_supported: MinorVersion,
) -> PackageConfig {
    let repo = root.join(repo_dir);
    let examples = repo.join("docs").join("source").join("examples");
    PackageConfig {
        id: id.to_string(),
        display_name: display_name.to_string(),
        description: description.to_string(),
        source: repo.join("src"),
        figures: Some(examples.join("figures")),
        examples: Some(examples),
        repo,
        root_modules: root_modules.iter().map(|m| m.to_string()).collect(),
        min_supported,
    }
}

fn builtin_categories() -> Vec<CategoryDef> {
    [
        ("getting-started", "Getting Started"),
        ("control", "Control Systems"),
        ("mechanics", "Mechanics"),
        ("electronics", "Electronics"),
        ("signal-processing", "Signal Processing"),
        ("chemical", "Chemical Engineering"),
        ("advanced", "Advanced Topics"),
        ("fmu", "FMU Integration"),
    ]
    .into_iter()
    .zip(1..)
    .map(|((id, title), order)| CategoryDef {
        id: id.to_string(),
        title: title.to_string(),
        order,
    })
    .collect()
}

fn builtin_example_categories() -> BTreeMap<String, ExampleCategory> {
    let table: &[(&str, &str, &[&str])] = &[
        ("harmonic_oscillator", "getting-started", &["ode", "basics"]),
        ("pendulum", "getting-started", &["ode", "adaptive", "physics"]),
        ("vanderpol", "getting-started", &["ode", "nonlinear"]),
        ("linear_feedback", "getting-started", &["ode", "feedback"]),
        ("pid_controller", "control", &["pid", "feedback"]),
        ("cascade_controller", "control", &["cascade", "feedback"]),
        ("dcmotor_control", "control", &["motor", "pid"]),
        ("kalman_filter", "control", &["estimation", "filter"]),
        ("thermostat", "control", &["hybrid", "events"]),
        ("abs_braking", "control", &["hybrid", "events", "automotive"]),
        ("bouncing_ball", "mechanics", &["events", "hybrid"]),
        ("bouncing_pendulum", "mechanics", &["events", "collision"]),
        ("switched_bouncing_ball", "mechanics", &["events", "hybrid"]),
        ("stick_slip", "mechanics", &["friction", "hybrid"]),
        ("elastic_pendulum", "mechanics", &["ode", "physics"]),
        ("billards", "mechanics", &["events", "collision"]),
        ("coupled_oscillators", "mechanics", &["ode", "physics"]),
        ("diode_circuit", "electronics", &["nonlinear", "circuit"]),
        ("noisy_amplifier", "electronics", &["noise", "circuit"]),
        ("delta_sigma_adc", "electronics", &["adc", "mixed-signal"]),
        ("sar_adc", "electronics", &["adc", "mixed-signal"]),
        ("spectrum_analysis", "signal-processing", &["fft", "frequency"]),
        ("fmcw_radar", "signal-processing", &["radar", "frequency"]),
        ("transfer_function", "signal-processing", &["frequency", "bode"]),
        ("rf_network_oneport", "signal-processing", &["rf", "network"]),
        ("chemical_reactor", "chemical", &["cstr", "reaction"]),
        ("algebraic_loop", "advanced", &["algebraic", "solver"]),
        ("nested_subsystems", "advanced", &["hierarchy", "subsystem"]),
        ("lorenz_attractor", "advanced", &["chaos", "ode"]),
        ("poincare_maps", "advanced", &["analysis", "chaos"]),
        ("fmu_cosimulation", "fmu", &["fmu", "cosim"]),
        ("fmu_model_exchange_bouncing_ball", "fmu", &["fmu", "model-exchange"]),
        ("fmu_model_exchange_vanderpol", "fmu", &["fmu", "model-exchange"]),
    ];

    table
        .iter()
        .map(|(stem, category, tags)| {
            (
                stem.to_string(),
                ExampleCategory {
                    category: category.to_string(),
                    tags: tags.iter().map(|t| t.to_string()).collect(),
                },
            )
        })
        .collect()
}
