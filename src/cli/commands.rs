use clap::Subcommand;

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Initialize the server (create database and operator session)
    Init {
        /// Data directory for database, schemas and packages
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Name of the first operator
        #[arg(long, default_value = "admin")]
        name: String,
    },

    /// Show server status information
    Info {
        /// Data directory for database, schemas and packages
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
