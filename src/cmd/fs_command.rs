use clap::Subcommand;

#[derive(Subcommand)]
pub enum FsCommands {
    /// List the children of a directory
    Ls {
        /// Path to list
        #[arg(value_name = "PATH", default_value = "/")]
        path: String,
    },

    /// Create a directory
    Mkdir {
        /// Path to create
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Create an empty file
    Touch {
        /// Path to create
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Delete a file or a directory tree
    Rm {
        /// Path to delete
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Show whether a path is a file or a directory
    Stat {
        /// Path to inspect
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Print the storage server currently serving a file
    Locate {
        /// File path
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Print a file's contents
    Cat {
        /// File path
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Upload a local file
    Put {
        /// Local file path
        #[arg(value_name = "LOCAL_PATH")]
        local_path: String,

        /// Destination path
        #[arg(value_name = "REMOTE_PATH")]
        remote_path: String,
    },
}
