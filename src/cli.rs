use std::path::PathBuf;

use clap::Parser;
use npk_tool::PixelFormat;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Lists the img (or sound) paths of an .npk file
    List {
        /// Input archive file path
        #[arg(required = true)]
        npk: PathBuf,

        /// List sounds instead of imgs
        #[arg(short, long, default_value_t = false)]
        sounds: bool,
    },
    /// Prints the frames of an img
    Frames {
        #[arg(required = true)]
        npk: PathBuf,

        /// Img path inside the archive, without the sprite/ prefix
        #[arg(required = true)]
        img: String,
    },
    /// Decodes one frame to a raw RGBA8 file
    Dump {
        #[arg(required = true)]
        npk: PathBuf,

        #[arg(required = true)]
        img: String,

        #[arg(required = true)]
        frame: usize,

        /// Output file path (optional)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Checks every .npk under the given paths, decoding every frame
    Validate {
        /// Archive files or directories to search
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Replaces one frame with pixels from a raw RGBA8 file
    Replace {
        #[arg(required = true)]
        npk: PathBuf,

        #[arg(required = true)]
        img: String,

        #[arg(required = true)]
        frame: usize,

        /// Raw RGBA8 input, width * height * 4 bytes
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long)]
        width: u32,

        #[arg(long)]
        height: u32,

        /// Pixel format to store: 1555, 4444 or 8888
        #[arg(short, long, default_value_t = PixelFormat::EightEightEightEight)]
        format: PixelFormat,

        /// Enable DEFLATE compression
        #[arg(short, long, default_value_t = false)]
        compress: bool,

        /// Draw offset, defaults to the old frame's
        #[arg(long)]
        x: Option<u32>,

        #[arg(long)]
        y: Option<u32>,
    },
    /// Turns one frame into a link to another frame of the same img
    Link {
        #[arg(required = true)]
        npk: PathBuf,

        #[arg(required = true)]
        img: String,

        #[arg(required = true)]
        frame: usize,

        #[arg(required = true)]
        target: u32,
    },
}
