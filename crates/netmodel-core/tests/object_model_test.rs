//! Object Model Tests
//!
//! Loads a configuration file from disk and checks the resulting bindings.

use netmodel_core::model::{self, INTERFACE_SERVICE};
use netmodel_core::{
    AddrconfMode, AddressFamilies, CallDisposition, Config, ErrorName, ExtensionDispatcher,
    LinkType, LocalConnection, MethodBinding, MethodCall, ObjectServer, ShellExecutor,
    UpdateTargets,
};
use std::io::Write;
use std::sync::Arc;

const CONFIG: &str = r#"<?xml version="1.0"?>
<config>
  <ipv6><disabled/></ipv6>
  <addrconf>
    <default-allow-update><none/><default-route/><resolver/></default-allow-update>
    <dhcp>
      <vendor-class>netmodel</vendor-class>
      <prefer-server ip="192.168.0.1" weight="always"/>
      <prefer-server ip="192.168.0.66" weight="never"/>
      <allow-update><all/></allow-update>
    </dhcp>
    <extension name="org.netmodel.Addrconf.ipv4.dhcp" type="dhcp" family="ipv4">
      <action name="requestLease" command="/usr/lib/netmodel/dhcp4 request %{name}"/>
      <action name="dropLease" command="/usr/lib/netmodel/dhcp4 drop %{name}"/>
    </extension>
  </addrconf>
  <linktype>
    <extension name="org.netmodel.Interface.Bond" type="bond">
      <action name="changeDevice" command="/usr/lib/netmodel/bond change %{name}"/>
    </extension>
  </linktype>
</config>
"#;

fn load() -> Config {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    Config::from_file(file.path()).unwrap()
}

#[test]
fn test_config_file_sections() {
    let config = load();

    assert!(!config.ipv6.enabled);
    assert_eq!(
        config.addrconf_update_mask(AddrconfMode::Dhcp),
        UpdateTargets::DEFAULT_ROUTE | UpdateTargets::RESOLVER
    );
    assert_eq!(config.addrconf.dhcp.preferred_servers.len(), 2);
    assert!(config.addrconf.dhcp.preferred_servers[1].is_excluded());

    let dhcp4 = config
        .find_addrconf_extension(AddrconfMode::Dhcp, Some(AddressFamilies::IPV4))
        .unwrap();
    assert_eq!(dhcp4.name, "org.netmodel.Addrconf.ipv4.dhcp");
    assert!(config
        .find_addrconf_extension(AddrconfMode::Dhcp, Some(AddressFamilies::IPV6))
        .is_none());
}

#[test]
fn test_bindings_follow_configuration() {
    let registry = model::build_registry(&load()).unwrap();

    let bound: Vec<(String, String)> = registry
        .services()
        .flat_map(|(_, service)| {
            service
                .methods()
                .iter()
                .filter(|m| matches!(m.binding(), MethodBinding::Extension(_)))
                .map(|m| (service.name().to_string(), m.name().to_string()))
                .collect::<Vec<_>>()
        })
        .collect();

    assert_eq!(
        bound,
        vec![
            ("org.netmodel.Interface.Bond".to_string(), "changeDevice".to_string()),
            ("org.netmodel.Addrconf.ipv4.dhcp".to_string(), "requestLease".to_string()),
            ("org.netmodel.Addrconf.ipv4.dhcp".to_string(), "dropLease".to_string()),
        ]
    );
}

#[test]
fn test_unbound_methods_fail_before_spawning() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = ExtensionDispatcher::new(Arc::new(load()), Arc::new(ShellExecutor::new()))
        .with_temp_dir(dir.path());
    let server = ObjectServer::bootstrap(dispatcher).unwrap();
    let path = server.add_interface("bond0", LinkType::Bond).unwrap();

    let (conn, mut rx) = LocalConnection::new();
    for (service, method) in [
        ("org.netmodel.Interface.Bond", "deleteDevice"),
        (INTERFACE_SERVICE, "linkUp"),
        ("org.netmodel.Addrconf.ipv6.dhcp", "requestLease"),
    ] {
        let disposition = server.handle_call(
            Arc::new(conn.clone()),
            MethodCall::new(1, path.as_str(), service, method),
        );
        match disposition {
            CallDisposition::Rejected(e) => assert_eq!(e.name, ErrorName::UnknownMethod),
            other => panic!("{service}.{method}: unexpected {other:?}"),
        }
        assert!(rx.try_recv().unwrap().is_error());
    }

    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}
