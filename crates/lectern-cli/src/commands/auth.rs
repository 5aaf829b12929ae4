use lectern_core::auth::AuthContext;

use crate::cli::AuthCommands;
use crate::commands::config::describe_backend;
use crate::config_profiles::{normalize_text_option, CliProfilesConfig};
use crate::error::CliError;

pub fn run_auth(command: AuthCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    match command {
        AuthCommands::Login {
            profile,
            user_id,
            token,
        } => {
            let profile_name = config.resolve_profile_name(profile.as_deref().or(global_profile));
            login(&mut config, &profile_name, &user_id, token)?;
            config.save().map_err(CliError::Config)?;
            println!("Signed in as {} on profile '{profile_name}'", user_id.trim());
            if config
                .profile(&profile_name)
                .is_some_and(|profile| profile.anonymous_owner().is_some())
            {
                println!("Run `lectern migrate preview` to review offline data for this account.");
            }
            Ok(())
        }
        AuthCommands::Status { profile } => {
            let profile_name = config.resolve_profile_name(profile.as_deref().or(global_profile));
            for line in status_lines(&config, &profile_name) {
                println!("{line}");
            }
            Ok(())
        }
        AuthCommands::Logout { profile } => {
            let profile_name = config.resolve_profile_name(profile.as_deref().or(global_profile));
            if logout(&mut config, &profile_name) {
                config.save().map_err(CliError::Config)?;
                println!("Signed out of profile '{profile_name}'");
            } else {
                println!("Profile '{profile_name}' is not signed in");
            }
            Ok(())
        }
    }
}

/// Set the account of a profile, storing the token with its backend.
pub fn login(
    config: &mut CliProfilesConfig,
    profile_name: &str,
    user_id: &str,
    token: Option<String>,
) -> Result<(), CliError> {
    let user_id = normalize_text_option(Some(user_id.to_string()))
        .ok_or_else(|| CliError::Auth("user id must not be empty".to_string()))?;
    if user_id.starts_with("anon-") {
        return Err(CliError::Auth(
            "user id must not use the anonymous owner prefix".to_string(),
        ));
    }

    let profile = config.profile_mut_or_default(profile_name);
    profile.ensure_anonymous_owner();
    profile.user_id = Some(user_id);
    if let Some(token) = normalize_text_option(token) {
        let backend = profile.backend.get_or_insert_with(Default::default);
        backend.token = Some(token);
    }
    Ok(())
}

/// Clear the account of a profile. Returns whether one was signed in.
pub fn logout(config: &mut CliProfilesConfig, profile_name: &str) -> bool {
    let Some(profile) = config.profiles.get_mut(profile_name) else {
        return false;
    };
    let was_signed_in = profile.user_id.take().is_some();
    if let Some(backend) = profile.backend.as_mut() {
        backend.token = None;
    }
    was_signed_in
}

pub fn status_lines(config: &CliProfilesConfig, profile_name: &str) -> Vec<String> {
    let Some(profile) = config.profile(profile_name) else {
        return vec![format!("Profile '{profile_name}' is not configured")];
    };
    let session = profile.session();
    let state = if session.is_authenticated_online() {
        "signed in (online)"
    } else if session.is_authenticated_offline() {
        "signed in (offline, no backend)"
    } else {
        "anonymous"
    };

    let mut lines = vec![
        format!("Profile: {profile_name}"),
        format!("Status: {state}"),
        format!("Owner: {}", session.effective_owner_id()),
    ];
    if let Some(anonymous) = session.anonymous_owner_id() {
        lines.push(format!("Device owner: {anonymous}"));
    }
    lines.push(format!(
        "Backend: {}",
        describe_backend(profile.backend.as_ref())
    ));
    lines.push(format!("Conflict strategy: {}", profile.sync.strategy));
    lines
}
