use super::Vm;
use crate::value::Value;

pub(super) fn define_all(vm: &mut Vm) {
    vm.define_native("clock", Some(0), clock);
    vm.define_native("str", Some(1), stringify);
    vm.define_native("len", Some(1), len);
}

/// Seconds since the VM was created.
fn clock(vm: &mut Vm, _args: &[Value]) -> Result<Value, String> {
    Ok(Value::number(vm.elapsed().as_secs_f64()))
}

fn stringify(vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    let text = vm.heap().display(args[0]);
    Ok(Value::object(vm.take_string(text)))
}

/// Byte length of a string.
fn len(vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    match vm.heap().as_string(args[0]) {
        Some(s) => Ok(Value::number(s.len() as f64)),
        None => Err(format!("expected a string, got {}", vm.heap().type_name(args[0]))),
    }
}
