//! Prints the Build CustomResourceDefinition as YAML.

use crds::Build;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&Build::crd())?);
    Ok(())
}
