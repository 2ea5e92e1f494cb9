//! Synchronous IPC: session round trips, teardown while requests are in flight, command
//! buffer translation, and ports.

mod common;

use common::{boot, Fixture};
use mikan_kernel::{
    calling_pid_desc, copy_handles_desc, make_header, mapped_buffer_desc, move_handles_desc,
    static_buffer_desc, ObjectData, ObjectId, ResultCode, ThreadStatus,
    ERR_SESSION_CLOSED_BY_REMOTE, RESULT_SUCCESS, RESULT_TIMEOUT,
};
use mikan_mem::HEAP_VADDR;
use pretty_assertions::assert_eq;

const SVC_CONTROL_MEMORY: u32 = 0x01;
const SVC_CLOSE_HANDLE: u32 = 0x23;
const SVC_WAIT_SYNCHRONIZATION1: u32 = 0x24;
const SVC_CONNECT_TO_PORT: u32 = 0x2D;
const SVC_SEND_SYNC_REQUEST: u32 = 0x32;
const SVC_CREATE_PORT: u32 = 0x47;
const SVC_CREATE_SESSION_TO_PORT: u32 = 0x48;
const SVC_CREATE_SESSION: u32 = 0x49;
const SVC_ACCEPT_SESSION: u32 = 0x4A;
const SVC_REPLY_AND_RECEIVE: u32 = 0x4F;

fn commit_heap(fixture: &mut Fixture, size: u32) -> u32 {
    fixture.svc(
        SVC_CONTROL_MEMORY,
        &[(0, 3), (1, HEAP_VADDR), (2, 0), (3, size), (4, 3)],
    );
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    fixture.reg(1)
}

fn write32(fixture: &mut Fixture, addr: u32, value: u32) {
    let process = fixture.process;
    fixture.kernel.mem_write32(process, addr, value).unwrap();
}

fn read32(fixture: &Fixture, addr: u32) -> u32 {
    fixture.kernel.mem_read32(fixture.process, addr).unwrap()
}

/// Stages a server thread blocked in ReplyAndReceive on the given server-session handle.
/// Returns (server thread, its command buffer, the handle-list address).
fn park_server(fixture: &mut Fixture, server_handle: u32, list_addr: u32) -> (ObjectId, u32) {
    let server = fixture.spawn("server", 20);
    fixture.kernel.reschedule();
    assert_eq!(fixture.current(), server);
    write32(fixture, list_addr, server_handle);
    let server_cmd = fixture.thread(server).command_buffer_address();
    write32(fixture, server_cmd, make_header(0xFFFF, 0, 0));
    fixture.svc(SVC_REPLY_AND_RECEIVE, &[(1, list_addr), (2, 1), (3, 0)]);
    assert_eq!(fixture.current(), fixture.main);
    assert_eq!(fixture.thread(server).status, ThreadStatus::WaitSynchAny);
    (server, server_cmd)
}

#[test]
fn session_round_trip_request_and_reply() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_SESSION, &[]);
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    let server_handle = fixture.reg(1);
    let client_handle = fixture.reg(2);
    let list_addr = commit_heap(&mut fixture, 0x1000);
    let (server, server_cmd) = park_server(&mut fixture, server_handle, list_addr);
    // Client request: two normal words.
    let main = fixture.main;
    let main_cmd = fixture.thread(main).command_buffer_address();
    write32(&mut fixture, main_cmd, make_header(0x42, 2, 0));
    write32(&mut fixture, main_cmd + 4, 111);
    write32(&mut fixture, main_cmd + 8, 222);
    fixture.svc(SVC_SEND_SYNC_REQUEST, &[(0, client_handle)]);
    // The client parks until the reply; the server thread picked up the request.
    assert_eq!(fixture.thread(main).status, ThreadStatus::WaitIpc);
    assert_eq!(fixture.current(), server);
    assert_eq!(fixture.reg(0), RESULT_SUCCESS.0);
    assert_eq!(fixture.reg(1), 0);
    // Receive-side translation copied the request into the server's buffer.
    assert_eq!(read32(&fixture, server_cmd), make_header(0x42, 2, 0));
    assert_eq!(read32(&fixture, server_cmd + 4), 111);
    assert_eq!(read32(&fixture, server_cmd + 8), 222);
    // Reply with one word; no further receive (empty handle list).
    write32(&mut fixture, server_cmd, make_header(0x42, 1, 0));
    write32(&mut fixture, server_cmd + 4, 999);
    fixture.svc(
        SVC_REPLY_AND_RECEIVE,
        &[(1, list_addr), (2, 0), (3, server_handle)],
    );
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    assert_eq!(fixture.reg(1), 0);
    // The client woke with success and the translated reply.
    assert_eq!(fixture.thread(main).status, ThreadStatus::Ready);
    assert_eq!(fixture.thread_reg(main, 0), RESULT_SUCCESS.0);
    assert_eq!(read32(&fixture, main_cmd + 4), 999);
}

#[test]
fn reply_with_no_handles_and_no_reply_returns_the_placeholder() {
    let mut fixture = boot();
    let list_addr = commit_heap(&mut fixture, 0x1000);
    let main_cmd = fixture.thread(fixture.main).command_buffer_address();
    write32(&mut fixture, main_cmd, make_header(0xFFFF, 0, 0));
    fixture.svc(SVC_REPLY_AND_RECEIVE, &[(1, list_addr), (2, 0), (3, 0)]);
    assert_eq!(fixture.result(), ResultCode(0xE7E3_FFFF));
    assert_eq!(fixture.reg(1), 0);
}

#[test]
fn destroying_the_server_session_resolves_a_pending_send() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_SESSION, &[]);
    let server_handle = fixture.reg(1);
    let client_handle = fixture.reg(2);
    let main = fixture.main;
    let closer = fixture.spawn("closer", 30);
    fixture.svc(SVC_SEND_SYNC_REQUEST, &[(0, client_handle)]);
    assert_eq!(fixture.thread(main).status, ThreadStatus::WaitIpc);
    assert_eq!(fixture.current(), closer);
    // Closing the last server-session handle tears the session down; the blocked client
    // resolves instead of hanging.
    fixture.svc(SVC_CLOSE_HANDLE, &[(0, server_handle)]);
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    assert_eq!(fixture.thread(main).status, ThreadStatus::Ready);
    assert_eq!(fixture.thread_reg(main, 0), ERR_SESSION_CLOSED_BY_REMOTE.0);
    assert_eq!(fixture.thread_reg(main, 0), 0xC920181A);
}

#[test]
fn sending_on_a_session_whose_server_died_fails_immediately() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_SESSION, &[]);
    let server_handle = fixture.reg(1);
    let client_handle = fixture.reg(2);
    fixture.svc(SVC_CLOSE_HANDLE, &[(0, server_handle)]);
    fixture.svc(SVC_SEND_SYNC_REQUEST, &[(0, client_handle)]);
    assert_eq!(fixture.result(), ERR_SESSION_CLOSED_BY_REMOTE);
    assert_eq!(fixture.current(), fixture.main);
}

#[test]
fn destroying_the_client_session_wakes_a_waiting_server() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_SESSION, &[]);
    let server_handle = fixture.reg(1);
    let client_handle = fixture.reg(2);
    let list_addr = commit_heap(&mut fixture, 0x1000);
    let (server, _) = park_server(&mut fixture, server_handle, list_addr);
    let main = fixture.main;
    fixture.svc(SVC_CLOSE_HANDLE, &[(0, client_handle)]);
    assert_eq!(fixture.thread_reg(main, 0), RESULT_SUCCESS.0);
    // The server's ReplyAndReceive observed the closed session, and the woken server
    // preempts the closing thread.
    assert_eq!(fixture.current(), server);
    assert_eq!(fixture.thread_reg(server, 0), ERR_SESSION_CLOSED_BY_REMOTE.0);
    assert_eq!(fixture.thread_reg(server, 1), 0);
}

#[test]
fn translation_rehomes_handles_pids_and_static_buffers() {
    let mut fixture = boot();
    fixture.svc(0x17, &[(1, 1)]); // sticky event to pass across
    let event_handle = fixture.reg(1);
    fixture.svc(SVC_CREATE_SESSION, &[]);
    let server_handle = fixture.reg(1);
    let client_handle = fixture.reg(2);
    let heap = commit_heap(&mut fixture, 0x2000);
    let list_addr = heap;
    let src_buf = heap + 0x100;
    let dst_buf = heap + 0x200;
    let payload = *b"PINGPONG";
    let process = fixture.process;
    fixture
        .kernel
        .mem_write_block(process, src_buf, &payload)
        .unwrap();
    let (server, server_cmd) = park_server(&mut fixture, server_handle, list_addr);
    // The server declares where static buffer 0 lands.
    write32(&mut fixture, server_cmd + 0x100, static_buffer_desc(8, 0));
    write32(&mut fixture, server_cmd + 0x104, dst_buf);
    // Client request: copy an event handle, ask for the caller's pid, ship a static buffer.
    let main = fixture.main;
    let main_cmd = fixture.thread(main).command_buffer_address();
    write32(&mut fixture, main_cmd, make_header(0x1, 0, 6));
    write32(&mut fixture, main_cmd + 4, copy_handles_desc(1));
    write32(&mut fixture, main_cmd + 8, event_handle);
    write32(&mut fixture, main_cmd + 12, calling_pid_desc());
    write32(&mut fixture, main_cmd + 16, 0);
    write32(&mut fixture, main_cmd + 20, static_buffer_desc(8, 0));
    write32(&mut fixture, main_cmd + 24, src_buf);
    fixture.svc(SVC_SEND_SYNC_REQUEST, &[(0, client_handle)]);
    assert_eq!(fixture.current(), server);
    // The copied handle is a fresh handle to the same object.
    let translated = read32(&fixture, server_cmd + 8);
    assert_ne!(translated, 0);
    assert_ne!(translated, event_handle);
    let table = match &fixture.kernel.object(process).unwrap().data {
        ObjectData::Process(process) => &process.handle_table,
        _ => unreachable!(),
    };
    assert_eq!(table.get(translated), table.get(event_handle));
    // The pid placeholder was filled in.
    assert_eq!(read32(&fixture, server_cmd + 16), 1);
    // The static buffer was copied into the server's declared slot.
    assert_eq!(read32(&fixture, server_cmd + 24), dst_buf);
    let mut got = [0u8; 8];
    fixture
        .kernel
        .mem_read_block(process, dst_buf, &mut got)
        .unwrap();
    assert_eq!(got, payload);
}

#[test]
fn moved_handles_are_closed_in_the_source_table() {
    let mut fixture = boot();
    fixture.svc(0x17, &[(1, 1)]);
    let event_handle = fixture.reg(1);
    fixture.svc(SVC_CREATE_SESSION, &[]);
    let server_handle = fixture.reg(1);
    let client_handle = fixture.reg(2);
    let list_addr = commit_heap(&mut fixture, 0x1000);
    let (server, server_cmd) = park_server(&mut fixture, server_handle, list_addr);
    let main = fixture.main;
    let main_cmd = fixture.thread(main).command_buffer_address();
    write32(&mut fixture, main_cmd, make_header(0x2, 0, 2));
    write32(&mut fixture, main_cmd + 4, move_handles_desc(1));
    write32(&mut fixture, main_cmd + 8, event_handle);
    fixture.svc(SVC_SEND_SYNC_REQUEST, &[(0, client_handle)]);
    assert_eq!(fixture.current(), server);
    let translated = read32(&fixture, server_cmd + 8);
    assert_ne!(translated, 0);
    let process = fixture.process;
    let table = match &fixture.kernel.object(process).unwrap().data {
        ObjectData::Process(process) => &process.handle_table,
        _ => unreachable!(),
    };
    // The source handle is gone; the moved one resolves.
    assert_eq!(table.get(event_handle), None);
    assert!(table.get(translated).is_some());
}

#[test]
fn mapped_buffer_descriptors_fail_back_to_the_client_without_waking_the_server() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_SESSION, &[]);
    let server_handle = fixture.reg(1);
    let client_handle = fixture.reg(2);
    let heap = commit_heap(&mut fixture, 0x1000);
    let (server, _) = park_server(&mut fixture, server_handle, heap);
    let main = fixture.main;
    let main_cmd = fixture.thread(main).command_buffer_address();
    write32(&mut fixture, main_cmd, make_header(0x3, 0, 2));
    write32(&mut fixture, main_cmd + 4, mapped_buffer_desc(0x10, 2));
    write32(&mut fixture, main_cmd + 8, heap + 0x800);
    fixture.svc(SVC_SEND_SYNC_REQUEST, &[(0, client_handle)]);
    // Deterministic translation error straight back to the client; the server stays parked.
    assert_eq!(fixture.result(), ResultCode(0xC8A01836));
    assert_eq!(fixture.current(), main);
    assert_eq!(fixture.thread(server).status, ThreadStatus::WaitSynchAny);
}

fn write_port_name(fixture: &mut Fixture, addr: u32, name: &[u8]) {
    let process = fixture.process;
    let mut bytes = name.to_vec();
    bytes.push(0);
    fixture.kernel.mem_write_block(process, addr, &bytes).unwrap();
}

#[test]
fn named_ports_connect_accept_and_enforce_their_session_limit() {
    let mut fixture = boot();
    let heap = commit_heap(&mut fixture, 0x1000);
    write_port_name(&mut fixture, heap, b"srv:test");
    fixture.svc(SVC_CREATE_PORT, &[(2, heap), (3, 1)]);
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    let server_port = fixture.reg(1);
    let _client_port = fixture.reg(2);
    // The server port is a wait object: nothing pending yet.
    fixture.svc(SVC_WAIT_SYNCHRONIZATION1, &[(0, server_port), (2, 0), (3, 0)]);
    assert_eq!(fixture.result(), RESULT_TIMEOUT);
    fixture.svc(SVC_CONNECT_TO_PORT, &[(1, heap)]);
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    // A pending session signals the port.
    fixture.svc(SVC_WAIT_SYNCHRONIZATION1, &[(0, server_port), (2, 0), (3, 0)]);
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    fixture.svc(SVC_ACCEPT_SESSION, &[(1, server_port)]);
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    assert_ne!(fixture.reg(1), 0);
    // The connection limit counts live sessions.
    fixture.svc(SVC_CONNECT_TO_PORT, &[(1, heap)]);
    assert_eq!(fixture.result(), ResultCode(0xD0401834));
    fixture.svc(SVC_ACCEPT_SESSION, &[(1, server_port)]);
    assert_eq!(fixture.result(), ResultCode(0xD8401823));
}

#[test]
fn create_session_to_port_shares_the_limit() {
    let mut fixture = boot();
    let heap = commit_heap(&mut fixture, 0x1000);
    write_port_name(&mut fixture, heap, b"srv:one");
    fixture.svc(SVC_CREATE_PORT, &[(2, heap), (3, 1)]);
    let client_port = fixture.reg(2);
    fixture.svc(SVC_CREATE_SESSION_TO_PORT, &[(1, client_port)]);
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    fixture.svc(SVC_CREATE_SESSION_TO_PORT, &[(1, client_port)]);
    assert_eq!(fixture.result(), ResultCode(0xD0401834));
}

#[test]
fn port_name_lookup_failures() {
    let mut fixture = boot();
    let heap = commit_heap(&mut fixture, 0x1000);
    write_port_name(&mut fixture, heap, b"nobody:home");
    fixture.svc(SVC_CONNECT_TO_PORT, &[(1, heap)]);
    assert_eq!(fixture.result(), ResultCode(0xD88007FA));
    write_port_name(&mut fixture, heap, b"way-too-long-name");
    fixture.svc(SVC_CONNECT_TO_PORT, &[(1, heap)]);
    assert_eq!(fixture.result(), ResultCode(0xE0E0181E));
    // An unmapped name pointer reports not-found, matching hardware.
    fixture.svc(SVC_CONNECT_TO_PORT, &[(1, 0x3F00_0000)]);
    assert_eq!(fixture.result(), ResultCode(0xD88007FA));
}
