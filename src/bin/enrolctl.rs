extern crate enrolment;

use enrolment::cli::Enrolctl;
use enrolment::cli::options::Options;

fn main() {
    let options = Options::from_args();
    let format = options.general.format;
    match Enrolctl::run(options) {
        Ok(report) => println!("{}", report.format(format)),
        Err(e) => {
            eprintln!("{}", e);
            ::std::process::exit(1);
        }
    }
}
