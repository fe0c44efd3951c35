//! Auth command handlers.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result};
use hailwatch_core::auth::claims::mask_token;
use hailwatch_core::auth::{Credentials, Registration, Role, RoleProfile};

use crate::cli::App;

#[derive(clap::Args)]
pub struct RegisterArgs {
    /// Full name
    #[arg(long)]
    name: String,
    /// Account e-mail
    #[arg(long)]
    email: String,
    /// Password (read from stdin when omitted)
    #[arg(long, env = "HAILWATCH_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Requested role: user, defensa_civil, meteorologo or cientifico_datos
    #[arg(long, default_value = "user")]
    role: String,

    /// Institution (defensa_civil)
    #[arg(long)]
    institution: Option<String>,
    /// Employee ID (defensa_civil)
    #[arg(long)]
    employee_id: Option<String>,
    /// Institutional e-mail (defensa_civil)
    #[arg(long)]
    institutional_email: Option<String>,

    /// Professional license number (meteorologo)
    #[arg(long)]
    license_number: Option<String>,
    /// Workplace (meteorologo)
    #[arg(long)]
    workplace: Option<String>,
    /// LinkedIn profile URL (meteorologo)
    #[arg(long)]
    linkedin_profile: Option<String>,

    /// Organization (cientifico_datos)
    #[arg(long)]
    organization: Option<String>,
    /// GitHub profile URL (cientifico_datos)
    #[arg(long)]
    github_profile: Option<String>,
    /// Why you want access (cientifico_datos)
    #[arg(long)]
    interest_description: Option<String>,
}

impl RegisterArgs {
    fn profile(&self, role: &Role) -> RoleProfile {
        let field = |v: &Option<String>| v.clone().unwrap_or_default();
        match role {
            Role::CivilDefense => RoleProfile::CivilDefense {
                institution: field(&self.institution),
                employee_id: field(&self.employee_id),
                institutional_email: field(&self.institutional_email),
            },
            Role::Meteorologist => RoleProfile::Meteorologist {
                license_number: field(&self.license_number),
                workplace: field(&self.workplace),
                linkedin_profile: field(&self.linkedin_profile),
            },
            Role::DataScientist => RoleProfile::DataScientist {
                organization: field(&self.organization),
                github_profile: field(&self.github_profile),
                interest_description: field(&self.interest_description),
            },
            _ => RoleProfile::None,
        }
    }
}

pub async fn login(app: &App, email: &str, password: Option<String>, force: bool) -> Result<()> {
    let current = app.session.state();
    let replacing = current.session().is_some();
    if let Some(existing) = current.session() {
        println!(
            "Already logged in as {} (token: {})",
            existing.identity,
            mask_token(&existing.token)
        );
    }
    if replacing && !force && !confirm("Do you want to replace the existing session? [y/N] ")? {
        println!("Login cancelled.");
        return Ok(());
    }

    let password = match password {
        Some(p) => p,
        None => read_secret("Password: ")?,
    };

    // The current session stays in place until the new one is confirmed.
    let credentials = Credentials::new(email, password);
    let attempt = if replacing {
        app.session.replace_login(&credentials).await
    } else {
        app.session.login(&credentials).await
    };
    let outcome = attempt.map_err(|e| anyhow::anyhow!(e.display_message()))?;

    let view = &outcome.view;
    let identity = view.identity.as_deref().unwrap_or(email);
    match &view.role {
        Some(role) => println!("✓ Logged in as {identity} ({role})"),
        None => println!("✓ Logged in as {identity}"),
    }
    if let Some(landing) = view.role.as_ref().map(|r| app.routes.authorizer().role_home(r)) {
        println!("  Landing page: {landing}");
    }
    match &outcome.persistence_warning {
        Some(warning) => println!("  Warning: session will not survive a restart ({warning})"),
        None => println!("  Session saved to: {}", app.store_path.display()),
    }

    Ok(())
}

pub async fn register(app: &App, args: RegisterArgs) -> Result<()> {
    let role = Role::from(args.role.as_str());
    let profile = args.profile(&role);
    let password = match args.password.clone() {
        Some(p) => p,
        None => read_secret("Password: ")?,
    };

    let registration = Registration {
        name: args.name,
        email: args.email,
        password,
        role,
        profile,
    };

    let outcome = app
        .session
        .register(&registration)
        .await
        .map_err(|e| anyhow::anyhow!(e.message))?;

    println!(
        "✓ {}",
        outcome.msg.as_deref().unwrap_or("Account created. You can now log in.")
    );
    if let Some(code) = &outcome.verification_code {
        println!("  Verification code: {code}");
    }

    Ok(())
}

pub fn logout(app: &App) {
    let outcome = app.session.logout();

    if outcome.was_authenticated {
        println!("✓ Logged out");
        println!("  Session removed from: {}", app.store_path.display());
    } else {
        println!("Not logged in (no session found).");
    }
    if let Some(warning) = outcome.persistence_warning {
        eprintln!("Warning: {warning}");
    }
}

pub fn status(app: &App) {
    app.session.expire_if_stale();
    let view = app.session.view();

    if !view.is_authenticated {
        println!("Not logged in.");
        return;
    }

    println!("Logged in as {}", view.identity.as_deref().unwrap_or("?"));
    if let Some(role) = &view.role {
        println!("  Role: {role}");
    }
    if let Some(expires_at) = view.expires_at {
        println!("  Expires: {}", expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    io::stdout().flush()?;

    let mut response = String::new();
    io::stdin().lock().read_line(&mut response)?;
    Ok(response.trim().eq_ignore_ascii_case("y"))
}

/// Reads one line from stdin; the prompt is shown only on a terminal.
fn read_secret(prompt: &str) -> Result<String> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        eprint!("{prompt}");
        io::stderr().flush()?;
    }

    let mut line = String::new();
    stdin.lock().read_line(&mut line).context("read password from stdin")?;
    let secret = line.trim_end_matches(['\r', '\n']).to_string();
    if secret.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }
    Ok(secret)
}
