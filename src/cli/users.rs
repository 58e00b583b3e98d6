use anyhow::Result;
use clap::{Args, Subcommand};

use crate::config::Config;
use crate::users::Role;

#[derive(Args)]
pub struct UsersArgs {
    #[command(subcommand)]
    pub command: UsersCommands,
}

#[derive(Subcommand)]
pub enum UsersCommands {
    /// Create a user
    Create {
        email: String,

        #[arg(long)]
        name: String,

        /// contributor, approver, admin or viewer
        #[arg(long, default_value = "contributor")]
        role: Role,
    },

    /// List users
    List,

    /// Change a user's role
    SetRole { id: String, role: Role },

    /// Issue an API token (printed once)
    Token {
        /// User id or e-mail
        user: String,
    },
}

pub fn run(args: UsersArgs, config: &Config) -> Result<()> {
    let state = super::open_state(config)?;

    match args.command {
        UsersCommands::Create { email, name, role } => {
            let user = state.users.create(None, &email, &name, role)?;
            println!("Created {} ({}) with id {}", user.email, user.role, user.id);
            Ok(())
        }
        UsersCommands::List => {
            for u in state.users.list(None)? {
                println!(
                    "{}  {:<11} {:<32} {}{}",
                    u.id,
                    u.role.as_str(),
                    u.email,
                    u.name,
                    if u.anonymized_at.is_some() { "  (anonymized)" } else { "" }
                );
            }
            Ok(())
        }
        UsersCommands::SetRole { id, role } => {
            let user = state.users.change_role(None, &id, role)?;
            println!("{} is now {}", user.email, user.role);
            Ok(())
        }
        UsersCommands::Token { user } => {
            let found = match state.users.find_by_email(&user)? {
                Some(u) => u,
                None => state.users.get(&user)?,
            };
            let token = state.users.issue_token(&found.id)?;
            eprintln!("API token for {} (shown once):", found.email);
            println!("{}", token);
            Ok(())
        }
    }
}
