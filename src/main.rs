use clap::{arg,crate_version,Command};
use streamflate::stream;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

const RCH: &str = "unreachable was reached";

fn ok_to_overwrite(path_out: &str) -> bool {
    if let Ok(_f) = std::fs::File::open(path_out) {
        let mut ans = String::new();
        eprint!("{} exists, overwrite? (y/n) ",path_out);
        std::io::stdin().read_line(&mut ans).expect("could not read stdin");
        if ans.trim_end()=="y" || ans.trim_end()=="Y" {
            log::warn!("existing file will not be truncated");
            return true;
        }
        return false;
    }
    true
}

fn main() -> STDRESULT
{
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let long_help =
"Examples:
---------
Compress:      `streamflate compress -i my_file -o my_file.sfl`
Expand:        `streamflate expand -i my_file.sfl -o my_file`";

    let mut main_cmd = Command::new("streamflate")
        .about("Compress and expand DEFLATE streams")
        .after_long_help(long_help)
        .version(crate_version!());
    main_cmd = main_cmd.subcommand(Command::new("compress")
        .arg(arg!(-i --input <PATH> "input path").required(true))
        .arg(arg!(-o --output <PATH> "output path").required(true))
        .about("compress a file"));

    main_cmd = main_cmd.subcommand(Command::new("expand")
        .arg(arg!(-i --input <PATH> "input path").required(true))
        .arg(arg!(-o --output <PATH> "output path").required(true))
        .about("expand a file"));

    let matches = main_cmd.get_matches();

    if let Some(cmd) = matches.subcommand_matches("compress") {
        let path_in = cmd.get_one::<String>("input").expect(RCH);
        let path_out = cmd.get_one::<String>("output").expect(RCH);
        if !ok_to_overwrite(path_out) {
            eprintln!("abort operation");
            return Ok(());
        }
        let mut in_file = std::fs::File::open(path_in)?;
        let mut out_file = std::fs::OpenOptions::new().write(true).truncate(false).create(true).open(path_out)?;
        let (in_size,out_size) = stream::compress(&mut in_file,&mut out_file,&streamflate::STD_OPTIONS)?;
        out_file.set_len(out_size)?;
        eprintln!("compressed {} into {}",in_size,out_size);
    }

    if let Some(cmd) = matches.subcommand_matches("expand") {
        let path_in = cmd.get_one::<String>("input").expect(RCH);
        let path_out = cmd.get_one::<String>("output").expect(RCH);
        if !ok_to_overwrite(path_out) {
            eprintln!("abort operation");
            return Ok(());
        }
        let mut in_file = std::fs::File::open(path_in)?;
        let mut out_file = std::fs::OpenOptions::new().write(true).truncate(false).create(true).open(path_out)?;
        let (in_size,out_size) = stream::expand(&mut in_file,&mut out_file)?;
        out_file.set_len(out_size)?;
        eprintln!("expanded {} into {}",in_size,out_size);
    }

    Ok(())
}
