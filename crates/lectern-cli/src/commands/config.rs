use std::env;

use lectern_core::config::{BackendKind, BackendSettings};
use lectern_core::models::ConflictStrategy;

use crate::cli::ConfigCommands;
use crate::config_profiles::{normalize_text_option, CliProfilesConfig};
use crate::error::CliError;

/// Values passed to `config init`; `None` keeps what the profile already has.
#[derive(Debug, Default)]
pub struct ConfigInitOptions {
    pub backend_id: Option<String>,
    pub backend_kind: Option<BackendKind>,
    pub backend_url: Option<String>,
    pub strategy: Option<ConflictStrategy>,
    pub auto_resolve_max_fields: Option<usize>,
    pub activate: bool,
}

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            profile,
            backend_id,
            backend_kind,
            backend_url,
            strategy,
            auto_resolve_max_fields,
            no_activate,
        } => {
            let options = ConfigInitOptions {
                backend_id,
                backend_kind: backend_kind.map(Into::into),
                backend_url,
                strategy: strategy.map(Into::into),
                auto_resolve_max_fields,
                activate: !no_activate,
            };
            run_config_init(profile.as_deref().or(global_profile), options)
        }
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    options: ConfigInitOptions,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);
    apply_config_init(&mut config, &profile_name, options)?;

    let path = config.save().map_err(CliError::Config)?;
    println!("Profile '{profile_name}' initialized at {}", path.display());

    let profile = config
        .profile(&profile_name)
        .ok_or_else(|| CliError::Config("Failed to persist profile".to_string()))?;
    if profile.user().is_none() {
        println!(
            "Sync is set up for profile '{profile_name}'. Run `lectern auth login --user-id <id>` to sign in."
        );
    } else {
        println!("Profile '{profile_name}' is ready. Run `lectern sync` to sync.");
    }
    Ok(())
}

/// Merge init options into a profile and validate the result.
pub fn apply_config_init(
    config: &mut CliProfilesConfig,
    profile_name: &str,
    options: ConfigInitOptions,
) -> Result<(), CliError> {
    let explicit_url = normalize_text_option(options.backend_url)
        .or_else(|| normalize_text_option(env::var("LECTERN_BACKEND_URL").ok()));

    let profile = config.profile_mut_or_default(profile_name);
    let mut backend = profile.backend.clone().unwrap_or_default();
    if let Some(id) = normalize_text_option(options.backend_id) {
        backend.id = Some(id);
    }
    if let Some(kind) = options.backend_kind {
        backend.kind = kind;
    }
    if let Some(url) = explicit_url {
        backend.base_url = Some(url);
    }
    backend.base_url = backend.normalized_base_url();
    backend.validate()?;
    profile.backend = Some(backend);

    if let Some(strategy) = options.strategy {
        profile.sync.strategy = strategy;
    }
    if let Some(max_fields) = options.auto_resolve_max_fields {
        profile.sync.auto_resolve_max_fields = max_fields;
    }
    profile.sync.validate()?;

    if options.activate {
        config.active_profile = Some(profile_name.to_string());
    }
    Ok(())
}

/// Human-readable backend description for status output.
pub fn describe_backend(backend: Option<&BackendSettings>) -> String {
    match backend {
        None => "none".to_string(),
        Some(settings) => match settings.kind {
            BackendKind::Memory => format!("{} (memory)", settings.backend_id()),
            BackendKind::Rest => format!(
                "{} ({})",
                settings.backend_id(),
                settings
                    .normalized_base_url()
                    .unwrap_or_else(|| "no url".to_string())
            ),
        },
    }
}
